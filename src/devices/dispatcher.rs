//! Command dispatcher.
//!
//! Turns decoded command packets into image store operations and session
//! updates. Every packet produces a response; the outcome tells the state
//! machine how the session should evolve.
use super::{
    image_store::ImageStore,
    packet::{CommandPacket, Opcode, ResponsePacket, MAX_PAYLOAD},
    session::{ImageDescriptor, Session},
    verification::{Fingerprint, ImageVerifier},
};
use crate::{
    error::{status, CodecError, CommandError, Error, VerifyError},
    hal::flash::ReadWrite,
    utilities::memory::Region,
};
use crc::crc32;

/// Protocol version reported by `ENTER_BOOTLOADER`.
pub const VERSION: [u8; 3] = [1, 0, 0];
/// Bytes `SEND_DATA` can stage ahead of a `PROGRAM_DATA`.
pub const STAGING_CAPACITY: usize = 2 * MAX_PAYLOAD;
const REPLY_CAPACITY: usize = 8;

/// Consequence of a successful command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    Continue,
    /// The installed image matches its descriptor.
    ApplicationVerified,
}

/// Result of dispatching one packet: the response to send back, and the
/// outcome the state machine acts upon.
#[derive(Debug, PartialEq, Eq)]
pub struct Dispatched<'a> {
    pub opcode: Option<Opcode>,
    pub response: ResponsePacket<'a>,
    pub outcome: Result<Effect, Error>,
}

pub struct Dispatcher {
    staged: [u8; STAGING_CAPACITY],
    staged_length: usize,
    reply: [u8; REPLY_CAPACITY],
    max_payload: usize,
}

impl Dispatcher {
    /// `max_payload` is reported to the host on `ENTER_BOOTLOADER`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            staged: [0u8; STAGING_CAPACITY],
            staged_length: 0,
            reply: [0u8; REPLY_CAPACITY],
            max_payload,
        }
    }

    /// Data accumulated by `SEND_DATA` and not yet programmed.
    pub fn staged(&self) -> &[u8] { &self.staged[..self.staged_length] }
    pub fn discard_staged(&mut self) { self.staged_length = 0; }

    pub fn dispatch<F: ReadWrite, V: ImageVerifier>(
        &mut self,
        packet: &CommandPacket,
        session: &mut Session,
        store: &mut ImageStore<F>,
        verifier: &mut V,
    ) -> Dispatched<'_> {
        let opcode = packet.opcode();
        let result = match opcode {
            Some(opcode) => {
                dfu_trace!("Dispatching {:?}", opcode);
                self.handle(opcode, packet.payload, session, store, verifier)
            }
            None => Err(CommandError::Unknown.into()),
        };

        match result {
            Ok((effect, reply_length)) => Dispatched {
                opcode,
                response: ResponsePacket {
                    status: status::SUCCESS,
                    payload: &self.reply[..reply_length],
                },
                outcome: Ok(effect),
            },
            Err(error) => Dispatched {
                opcode,
                response: ResponsePacket { status: error.status_code(), payload: &[] },
                outcome: Err(error),
            },
        }
    }

    fn handle<F: ReadWrite, V: ImageVerifier>(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        session: &mut Session,
        store: &mut ImageStore<F>,
        verifier: &mut V,
    ) -> Result<(Effect, usize), Error> {
        match opcode {
            Opcode::EnterBootloader => {
                expect_empty(payload)?;
                session.restart_transfer();
                self.discard_staged();
                self.reply[..3].copy_from_slice(&VERSION);
                self.reply[3..5].copy_from_slice(&(self.max_payload as u16).to_le_bytes());
                self.reply[5..7].copy_from_slice(&(store.row_size() as u16).to_le_bytes());
                Ok((Effect::Continue, 7))
            }
            Opcode::SetAddress => {
                let address = word(payload, 0).filter(|_| payload.len() == 4);
                let address = address.ok_or(CommandError::BadParam)?;
                if !session.region.contains(address) {
                    return Err(Error::Address);
                }
                session.current_write_address = address;
                Ok((Effect::Continue, 0))
            }
            Opcode::SendData => {
                self.stage(payload)?;
                Ok((Effect::Continue, 0))
            }
            Opcode::ProgramData => {
                let checksum = self.program(payload, session, store)?;
                self.reply[..4].copy_from_slice(&checksum.to_le_bytes());
                Ok((Effect::Continue, 4))
            }
            Opcode::VerifyData => {
                self.discard_staged();
                let (region, expected) = match payload.len() {
                    12 => (range(payload, session.region)?, word(payload, 8)),
                    _ => return Err(CommandError::BadParam.into()),
                };
                let mut calculated = 0u32;
                store.for_each_chunk(region, |chunk| {
                    calculated = crc32::update(calculated, &crc32::IEEE_TABLE, chunk)
                })?;
                if Some(calculated) != expected {
                    return Err(VerifyError::ChecksumMismatch.into());
                }
                Ok((Effect::Continue, 0))
            }
            Opcode::EraseData => {
                if payload.len() != 8 {
                    return Err(CommandError::BadParam.into());
                }
                store.erase(range(payload, session.region)?)?;
                Ok((Effect::Continue, 0))
            }
            Opcode::SetMetadata => {
                if payload.len() < 9 {
                    return Err(CommandError::BadParam.into());
                }
                let fingerprint =
                    Fingerprint::from_slice(&payload[8..]).ok_or(CommandError::BadParam)?;
                let region = range(payload, session.region)?;
                session.descriptor = Some(ImageDescriptor {
                    base_address: region.start,
                    length: region.len(),
                    fingerprint,
                });
                Ok((Effect::Continue, 0))
            }
            Opcode::VerifyApplication => {
                expect_empty(payload)?;
                let descriptor = session.descriptor.ok_or(CommandError::BadParam)?;
                let region = descriptor.region().ok_or(Error::Address)?;
                verifier.reset();
                store.for_each_chunk(region, |chunk| verifier.update(chunk))?;
                verifier.check(descriptor.fingerprint.as_bytes())?;
                Ok((Effect::ApplicationVerified, 0))
            }
            Opcode::Sync => {
                expect_empty(payload)?;
                self.discard_staged();
                Ok((Effect::Continue, 0))
            }
        }
    }

    fn stage(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.staged_length + bytes.len();
        if end > STAGING_CAPACITY {
            self.discard_staged();
            return Err(CodecError::Length.into());
        }
        self.staged[self.staged_length..end].copy_from_slice(bytes);
        self.staged_length = end;
        Ok(())
    }

    /// Programs staged data followed by `payload` at the write cursor, and
    /// returns the updated running checksum. Staged data is consumed
    /// whatever the result.
    fn program<F: ReadWrite>(
        &mut self,
        payload: &[u8],
        session: &mut Session,
        store: &mut ImageStore<F>,
    ) -> Result<u32, Error> {
        let staged = self.stage(payload);
        let length = self.staged_length;
        self.discard_staged();
        staged?;
        if length == 0 {
            return Err(CommandError::BadParam.into());
        }

        let data = &self.staged[..length];
        let address = session.current_write_address;
        let target = Region::from_length(address, length as u32).ok_or(Error::Address)?;
        if !session.region.encloses(target) {
            return Err(Error::Address);
        }
        store.write(address, data)?;

        session.running_checksum =
            crc32::update(session.running_checksum, &crc32::IEEE_TABLE, data);
        session.current_write_address = target.end;
        session.bytes_received_since_checksum_reset =
            session.bytes_received_since_checksum_reset.saturating_add(length as u32);
        Ok(session.running_checksum)
    }
}

fn expect_empty(payload: &[u8]) -> Result<(), CommandError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(CommandError::BadParam)
    }
}

/// Little endian word at `offset`, if the payload is long enough.
fn word(payload: &[u8], offset: usize) -> Option<u32> {
    let bytes = payload.get(offset..offset + 4)?;
    bytes.try_into().ok().map(u32::from_le_bytes)
}

/// `[start, start + length)` from the first two words of the payload,
/// which must lie inside `permitted`.
fn range(payload: &[u8], permitted: Region) -> Result<Region, Error> {
    let start = word(payload, 0).ok_or(CommandError::BadParam)?;
    let length = word(payload, 4).ok_or(CommandError::BadParam)?;
    match Region::from_length(start, length) {
        Some(region) if permitted.encloses(region) => Ok(region),
        _ => Err(Error::Address),
    }
}
