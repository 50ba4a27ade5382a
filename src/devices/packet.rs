//! DFU packet codec.
//!
//! Command frames (host to device):
//! `[SOF][command][length: u16 LE][payload][checksum: u16 LE]`
//!
//! Response frames (device to host):
//! `[SOF][status][length: u16 LE][payload][checksum: u16 LE][EOF]`
//!
//! The checksum covers every byte preceding it. Decoding borrows the
//! caller's buffer and encoding writes into one, so the codec never
//! allocates.
use crate::error::CodecError;
use crc::crc16;
use nom::{
    bytes::streaming::{tag, take},
    number::streaming::{be_u8, le_u16},
    IResult,
};
use static_assertions::const_assert;

pub const SOF: u8 = 0x01;
pub const EOF: u8 = 0x17;

/// Start marker, code and length.
pub const HEADER_SIZE: usize = 4;
pub const CHECKSUM_SIZE: usize = 2;
pub const COMMAND_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;
pub const RESPONSE_OVERHEAD: usize = COMMAND_OVERHEAD + 1;

/// Payload capacity of the packet buffers.
pub const MAX_PAYLOAD: usize = 512;
/// Size of a buffer able to hold any frame, in either direction.
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD + RESPONSE_OVERHEAD;

const_assert!(MAX_PAYLOAD <= u16::MAX as usize);

const SOF_TAG: &[u8] = &[SOF];
const EOF_TAG: &[u8] = &[EOF];

/// Frame checksum algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChecksumKind {
    /// 16 bit two's complement of the byte sum.
    Additive,
    /// CRC-16/X25 (reflected CRC-16-CCITT).
    Crc,
}

impl ChecksumKind {
    pub fn compute(self, bytes: &[u8]) -> u16 {
        match self {
            ChecksumKind::Additive => {
                let sum = bytes.iter().fold(0u16, |sum, b| sum.wrapping_add(*b as u16));
                (!sum).wrapping_add(1)
            }
            ChecksumKind::Crc => crc16::checksum_x25(bytes),
        }
    }
}

/// Commands understood by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    VerifyApplication = 0x31,
    Sync = 0x35,
    SendData = 0x37,
    EnterBootloader = 0x38,
    SetAddress = 0x3A,
    EraseData = 0x44,
    ProgramData = 0x49,
    VerifyData = 0x4A,
    SetMetadata = 0x4C,
}

impl Opcode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x31 => Opcode::VerifyApplication,
            0x35 => Opcode::Sync,
            0x37 => Opcode::SendData,
            0x38 => Opcode::EnterBootloader,
            0x3A => Opcode::SetAddress,
            0x44 => Opcode::EraseData,
            0x49 => Opcode::ProgramData,
            0x4A => Opcode::VerifyData,
            0x4C => Opcode::SetMetadata,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 { self as u8 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandPacket<'a> {
    pub command: u8,
    pub payload: &'a [u8],
}

impl<'a> CommandPacket<'a> {
    pub fn new(opcode: Opcode, payload: &'a [u8]) -> Self {
        Self { command: opcode.code(), payload }
    }

    pub fn opcode(&self) -> Option<Opcode> { Opcode::from_code(self.command) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponsePacket<'a> {
    pub status: u8,
    pub payload: &'a [u8],
}

/// Outcome of inspecting a partially received byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// More bytes are needed before a frame can be delimited.
    Incomplete,
    /// The first `n` bytes hold a frame, ready to be decoded.
    Complete(usize),
    /// The stream does not start with a frame marker.
    Garbage,
}

struct Header {
    code: u8,
    length: usize,
}

fn header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, _) = tag(SOF_TAG)(input)?;
    let (input, code) = be_u8(input)?;
    let (input, length) = le_u16(input)?;
    Ok((input, Header { code, length: length as usize }))
}

fn body(input: &[u8], length: usize) -> IResult<&[u8], (&[u8], u16)> {
    let (input, payload) = take(length)(input)?;
    let (input, checksum) = le_u16(input)?;
    Ok((input, (payload, checksum)))
}

fn end_marker(input: &[u8]) -> IResult<&[u8], &[u8]> { tag(EOF_TAG)(input) }

/// Delimits the first command frame in `raw`. A header announcing more
/// than `capacity` payload bytes is delimited right after the header, so
/// the decoder can report the length error without waiting for a payload
/// that would not fit.
pub fn probe(raw: &[u8], capacity: usize) -> Probe {
    match header(raw) {
        Err(nom::Err::Incomplete(_)) => Probe::Incomplete,
        Err(_) => Probe::Garbage,
        Ok((_, header)) if header.length > capacity => Probe::Complete(HEADER_SIZE),
        Ok((_, header)) => {
            let total = COMMAND_OVERHEAD + header.length;
            if raw.len() >= total {
                Probe::Complete(total)
            } else {
                Probe::Incomplete
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    pub checksum: ChecksumKind,
    pub max_payload: usize,
}

impl Codec {
    pub fn new(checksum: ChecksumKind, max_payload: usize) -> Self {
        Self { checksum, max_payload: max_payload.min(MAX_PAYLOAD) }
    }

    /// Decodes a complete command frame.
    pub fn decode<'a>(&self, raw: &'a [u8]) -> Result<CommandPacket<'a>, CodecError> {
        let (rest, header) = header(raw).map_err(|_| CodecError::Malformed)?;
        if header.length > self.max_payload {
            return Err(CodecError::Length);
        }
        let (rest, (payload, checksum)) =
            body(rest, header.length).map_err(|_| CodecError::Malformed)?;
        if !rest.is_empty() {
            return Err(CodecError::Malformed);
        }
        self.check(&raw[..HEADER_SIZE + header.length], checksum)?;
        Ok(CommandPacket { command: header.code, payload })
    }

    /// Encodes a response frame into `out`, returning the frame length.
    pub fn encode(&self, response: &ResponsePacket, out: &mut [u8]) -> Result<usize, CodecError> {
        self.write_frame(response.status, response.payload, Some(EOF), out)
    }

    /// Encodes a command frame into `out`, returning the frame length. This
    /// is the host side of the protocol.
    pub fn encode_command(
        &self,
        command: &CommandPacket,
        out: &mut [u8],
    ) -> Result<usize, CodecError> {
        self.write_frame(command.command, command.payload, None, out)
    }

    /// Decodes a complete response frame. This is the host side of the protocol.
    pub fn decode_response<'a>(&self, raw: &'a [u8]) -> Result<ResponsePacket<'a>, CodecError> {
        let (rest, header) = header(raw).map_err(|_| CodecError::Malformed)?;
        if header.length > self.max_payload {
            return Err(CodecError::Length);
        }
        let (rest, (payload, checksum)) =
            body(rest, header.length).map_err(|_| CodecError::Malformed)?;
        let (rest, _) = end_marker(rest).map_err(|_| CodecError::Malformed)?;
        if !rest.is_empty() {
            return Err(CodecError::Malformed);
        }
        self.check(&raw[..HEADER_SIZE + header.length], checksum)?;
        Ok(ResponsePacket { status: header.code, payload })
    }

    fn check(&self, covered: &[u8], received: u16) -> Result<(), CodecError> {
        if self.checksum.compute(covered) == received {
            Ok(())
        } else {
            Err(CodecError::Checksum)
        }
    }

    fn write_frame(
        &self,
        code: u8,
        payload: &[u8],
        trailer: Option<u8>,
        out: &mut [u8],
    ) -> Result<usize, CodecError> {
        let length = payload.len();
        let checksum_position = HEADER_SIZE + length;
        let total = checksum_position + CHECKSUM_SIZE + trailer.map_or(0, |_| 1);
        if length > self.max_payload || out.len() < total {
            return Err(CodecError::Length);
        }

        out[0] = SOF;
        out[1] = code;
        out[2..HEADER_SIZE].copy_from_slice(&(length as u16).to_le_bytes());
        out[HEADER_SIZE..checksum_position].copy_from_slice(payload);
        let checksum = self.checksum.compute(&out[..checksum_position]);
        out[checksum_position..checksum_position + CHECKSUM_SIZE]
            .copy_from_slice(&checksum.to_le_bytes());
        if let Some(marker) = trailer {
            out[total - 1] = marker;
        }
        Ok(total)
    }
}

impl Default for Codec {
    fn default() -> Self { Self::new(ChecksumKind::Additive, MAX_PAYLOAD) }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(codec: &Codec, command: CommandPacket, buffer: &mut [u8]) -> usize {
        codec.encode_command(&command, buffer).unwrap()
    }

    #[test]
    fn enter_command_matches_reference_frame() {
        // Given
        let codec = Codec::default();
        let mut buffer = [0u8; MAX_FRAME_SIZE];

        // When
        let length = encoded(&codec, CommandPacket::new(Opcode::EnterBootloader, &[]), &mut buffer);

        // Then
        assert_eq!(&[0x01, 0x38, 0x00, 0x00, 0xC7, 0xFF], &buffer[..length]);
    }

    #[test]
    fn command_frames_survive_encoding_and_decoding() {
        let payload = [0xAAu8; 64];
        let address = 0x1000u32.to_le_bytes();
        let commands = [
            CommandPacket::new(Opcode::Sync, &[]),
            CommandPacket::new(Opcode::SetAddress, &address),
            CommandPacket::new(Opcode::ProgramData, &payload),
            CommandPacket { command: 0x7E, payload: &payload[..3] },
        ];

        for checksum in [ChecksumKind::Additive, ChecksumKind::Crc] {
            let codec = Codec::new(checksum, MAX_PAYLOAD);
            for command in commands.iter() {
                let mut buffer = [0u8; MAX_FRAME_SIZE];
                let length = encoded(&codec, *command, &mut buffer);
                assert_eq!(COMMAND_OVERHEAD + command.payload.len(), length);
                assert_eq!(Ok(*command), codec.decode(&buffer[..length]));
            }
        }
    }

    #[test]
    fn oversized_length_field_is_rejected_before_payload() {
        // Given
        let codec = Codec::new(ChecksumKind::Additive, 64);
        let header_only = [SOF, 0x49, 65, 0x00];

        // Then
        assert_eq!(Err(CodecError::Length), codec.decode(&header_only));

        // Given
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let wide = Codec::default();
        let length =
            encoded(&wide, CommandPacket::new(Opcode::ProgramData, &[0u8; 65]), &mut buffer);

        // Then
        assert_eq!(Err(CodecError::Length), codec.decode(&buffer[..length]));
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        // Given
        let codec = Codec::default();
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let command = CommandPacket::new(Opcode::ProgramData, &[1, 2, 3]);
        let length = encoded(&codec, command, &mut buffer);

        // When
        buffer[length - 1] ^= 0x01;

        // Then
        assert_eq!(Err(CodecError::Checksum), codec.decode(&buffer[..length]));

        // When (payload corrupted, checksum intact)
        buffer[length - 1] ^= 0x01;
        buffer[HEADER_SIZE] = 0xFF;

        // Then
        assert_eq!(Err(CodecError::Checksum), codec.decode(&buffer[..length]));
    }

    #[test]
    fn additive_and_crc_checksums_are_not_interchangeable() {
        // Given
        let additive = Codec::new(ChecksumKind::Additive, MAX_PAYLOAD);
        let crc = Codec::new(ChecksumKind::Crc, MAX_PAYLOAD);
        let mut buffer = [0u8; MAX_FRAME_SIZE];

        // When
        let length = encoded(&additive, CommandPacket::new(Opcode::Sync, &[]), &mut buffer);

        // Then
        assert_eq!(Err(CodecError::Checksum), crc.decode(&buffer[..length]));
    }

    #[test]
    fn missing_markers_and_truncation_are_malformed() {
        let codec = Codec::default();
        assert_eq!(Err(CodecError::Malformed), codec.decode(&[]));
        assert_eq!(Err(CodecError::Malformed), codec.decode(&[0x02, 0x38, 0x00, 0x00, 0xC7, 0xFF]));
        assert_eq!(Err(CodecError::Malformed), codec.decode(&[SOF, 0x49, 0x04, 0x00, 0xAA]));
        assert_eq!(
            Err(CodecError::Malformed),
            codec.decode(&[0x01, 0x38, 0x00, 0x00, 0xC7, 0xFF, 0x00])
        );
    }

    #[test]
    fn response_frames_carry_end_marker() {
        // Given
        let codec = Codec::default();
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let response = ResponsePacket { status: 0x00, payload: &[0xDE, 0xAD] };

        // When
        let length = codec.encode(&response, &mut buffer).unwrap();

        // Then
        assert_eq!(RESPONSE_OVERHEAD + 2, length);
        assert_eq!(EOF, buffer[length - 1]);
        assert_eq!(Ok(response), codec.decode_response(&buffer[..length]));

        // When
        buffer[length - 1] = 0x00;

        // Then
        assert_eq!(Err(CodecError::Malformed), codec.decode_response(&buffer[..length]));
    }

    #[test]
    fn encoding_into_short_buffer_fails() {
        let codec = Codec::default();
        let mut buffer = [0u8; 8];
        let response = ResponsePacket { status: 0x00, payload: &[0u8; 4] };
        assert_eq!(Err(CodecError::Length), codec.encode(&response, &mut buffer));
    }

    #[test]
    fn probing_delimits_streamed_frames() {
        // Given
        let codec = Codec::default();
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let length = encoded(&codec, CommandPacket::new(Opcode::SendData, &[9u8; 10]), &mut buffer);

        // Then
        assert_eq!(Probe::Incomplete, probe(&buffer[..0], MAX_PAYLOAD));
        assert_eq!(Probe::Incomplete, probe(&buffer[..3], MAX_PAYLOAD));
        assert_eq!(Probe::Incomplete, probe(&buffer[..length - 1], MAX_PAYLOAD));
        assert_eq!(Probe::Complete(length), probe(&buffer[..length], MAX_PAYLOAD));
        assert_eq!(Probe::Complete(length), probe(&buffer[..length + 4], MAX_PAYLOAD));
        assert_eq!(Probe::Garbage, probe(&[0x55, SOF], MAX_PAYLOAD));
        assert_eq!(Probe::Complete(HEADER_SIZE), probe(&[SOF, 0x37, 0xFF, 0xFF], MAX_PAYLOAD));
    }

    #[test]
    fn opcodes_map_to_their_codes() {
        assert_eq!(Some(Opcode::ProgramData), Opcode::from_code(0x49));
        assert_eq!(Some(Opcode::VerifyApplication), Opcode::from_code(0x31));
        assert_eq!(None, Opcode::from_code(0x00));
        assert_eq!(0x4C, Opcode::SetMetadata.code());
    }
}
