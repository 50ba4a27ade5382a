//! Error types for the DFU core.
//!
//! Module level errors are grouped under a single top level [`Error`],
//! which knows its wire status code, its propagation policy and how to
//! report itself through a console.
use ufmt::{uWrite, uwriteln};

/// Frame level failures. Always recoverable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Declared payload length outside of the configured capacity.
    Length,
    /// Frame checksum does not match its contents.
    Checksum,
    /// Missing or incorrect frame markers, or truncated frame.
    Malformed,
}

/// Command level failures on well framed packets. Always recoverable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    Unknown,
    BadParam,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    Write,
    Erase,
    Read,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyError {
    ChecksumMismatch,
    SignatureInvalid,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    NotStarted,
    SendFailed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeoutError {
    Idle,
    Command,
}

/// Top level error type for the DFU core. Every dispatch path ends up
/// either in success or in one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Codec(CodecError),
    Command(CommandError),
    /// Address outside of the permitted region.
    Address,
    /// Storage access not aligned to a row boundary.
    Alignment,
    Flash(FlashError),
    Verify(VerifyError),
    Transport(TransportError),
    Timeout(TimeoutError),
    /// Error caused by a faulty configuration
    Configuration(&'static str),
}

/// Wire status codes, shared by every response frame.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR_VERIFY: u8 = 0x02;
    pub const ERROR_LENGTH: u8 = 0x03;
    pub const ERROR_DATA: u8 = 0x04;
    pub const ERROR_COMMAND: u8 = 0x05;
    pub const ERROR_CHECKSUM: u8 = 0x08;
    pub const ERROR_ADDRESS: u8 = 0x0A;
    pub const ERROR_ALIGNMENT: u8 = 0x0B;
    pub const ERROR_FLASH: u8 = 0x0C;
    pub const ERROR_MALFORMED: u8 = 0x0D;
    pub const ERROR_TIMEOUT: u8 = 0x0E;
    pub const ERROR_UNKNOWN: u8 = 0x0F;
}

impl From<CodecError> for Error {
    fn from(error: CodecError) -> Self { Error::Codec(error) }
}

impl From<CommandError> for Error {
    fn from(error: CommandError) -> Self { Error::Command(error) }
}

impl From<FlashError> for Error {
    fn from(error: FlashError) -> Self { Error::Flash(error) }
}

impl From<VerifyError> for Error {
    fn from(error: VerifyError) -> Self { Error::Verify(error) }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self { Error::Transport(error) }
}

impl From<TimeoutError> for Error {
    fn from(error: TimeoutError) -> Self { Error::Timeout(error) }
}

impl Error {
    /// Status code carried by the response frame reporting this error.
    pub fn status_code(&self) -> u8 {
        match self {
            Error::Codec(CodecError::Length) => status::ERROR_LENGTH,
            Error::Codec(CodecError::Checksum) => status::ERROR_CHECKSUM,
            Error::Codec(CodecError::Malformed) => status::ERROR_MALFORMED,
            Error::Command(CommandError::Unknown) => status::ERROR_COMMAND,
            Error::Command(CommandError::BadParam) => status::ERROR_DATA,
            Error::Address => status::ERROR_ADDRESS,
            Error::Alignment => status::ERROR_ALIGNMENT,
            Error::Flash(_) => status::ERROR_FLASH,
            Error::Verify(_) => status::ERROR_VERIFY,
            Error::Timeout(_) => status::ERROR_TIMEOUT,
            Error::Transport(_) | Error::Configuration(_) => status::ERROR_UNKNOWN,
        }
    }

    /// Whether this error aborts the current update attempt. Storage and
    /// verification faults do; malformed but recoverable input does not.
    pub fn is_fatal(&self) -> bool { matches!(self, Error::Flash(_) | Error::Verify(_)) }

    /// Brief description of the error, meant for console output.
    pub fn description(&self) -> &'static str {
        match self {
            Error::Codec(CodecError::Length) => {
                "The length of the packet is outside of the expected range"
            }
            Error::Codec(CodecError::Checksum) => {
                "The checksum does not match the expected value"
            }
            Error::Codec(CodecError::Malformed) => "The packet markers are missing or incorrect",
            Error::Command(CommandError::Unknown) => "The command is not recognized",
            Error::Command(CommandError::BadParam) => "The data in the received packet is invalid",
            Error::Address => "The wrong address",
            Error::Alignment => "The address is not aligned to a flash row",
            Error::Flash(FlashError::Write) => "Flash write failed",
            Error::Flash(FlashError::Erase) => "Flash erase failed",
            Error::Flash(FlashError::Read) => "Flash read failed",
            Error::Verify(_) => "Verification failed",
            Error::Transport(TransportError::NotStarted) => "The transport is not started",
            Error::Transport(TransportError::SendFailed) => "The response could not be sent",
            Error::Timeout(TimeoutError::Idle) => "No session started before the idle timeout",
            Error::Timeout(TimeoutError::Command) => "The command timed out",
            Error::Configuration(text) => text,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::Codec(_) => "Codec Error",
            Error::Command(_) => "Command Error",
            Error::Address => "Address Error",
            Error::Alignment => "Alignment Error",
            Error::Flash(_) => "Flash Error",
            Error::Verify(_) => "Verify Error",
            Error::Transport(_) => "Transport Error",
            Error::Timeout(_) => "Timeout Error",
            Error::Configuration(_) => "Configuration Error",
        }
    }

    /// Reports error via abstract console
    pub fn report<W: uWrite>(&self, console: &mut W) -> Result<(), W::Error> {
        uwriteln!(console, "[{}] -> {}", self.kind(), self.description())
    }
}
