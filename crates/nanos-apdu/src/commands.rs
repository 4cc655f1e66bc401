//! Commands understood by the signing application.

use crate::constants::*;

/// Commands that can be sent to the device.
///
/// Each command maps to a fixed `(instruction, p1, p2)` triple. New commands only
/// need a new variant and a row in [`Command::header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Read the application version.
    GetVersion,
    /// Derive an address and show it on the device for confirmation.
    GetAddress,
    /// Derive an address without the on-screen confirmation.
    GetAddressSilent,
    /// Sign a 32-byte transaction hash.
    SignHash,
}

impl Command {
    /// Every command, in declaration order.
    pub const ALL: [Command; 4] = [
        Command::GetVersion,
        Command::GetAddress,
        Command::GetAddressSilent,
        Command::SignHash,
    ];

    /// The `(instruction, p1, p2)` triple of this command.
    pub const fn header(&self) -> (u8, u8, u8) {
        match self {
            Command::GetVersion => (INS_GET_VERSION, 0x00, 0x00),
            Command::GetAddress => (INS_GET_ADDRESS, 0x00, 0x00),
            Command::GetAddressSilent => (INS_GET_ADDRESS, P1_SILENT, 0x00),
            Command::SignHash => (INS_SIGN_HASH, 0x00, 0x00),
        }
    }

    /// Instruction byte.
    pub const fn instruction(&self) -> u8 {
        self.header().0
    }

    /// Find the command matching a decoded header.
    pub fn from_header(instruction: u8, p1: u8, p2: u8) -> Option<Command> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.header() == (instruction, p1, p2))
    }

    /// Name used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::GetVersion => "get_version",
            Command::GetAddress => "get_address",
            Command::GetAddressSilent => "get_address_silent",
            Command::SignHash => "sign_hash",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
