//! DFU update state machine.
//!
//! [`Dfu`] owns every piece of a session: the transports, the image store,
//! the verifier and the dispatcher. The caller drives it by invoking
//! [`Dfu::continue_session`] once per loop iteration; each call polls the
//! active transport for at most one tick, handles at most one frame and
//! reports where the session stands.
use super::{
    dispatcher::{Dispatcher, Effect},
    image_store::ImageStore,
    packet::{Codec, Opcode, ResponsePacket, MAX_FRAME_SIZE},
    session::{Outcome, Session, State},
    transport::{Transport, TransportKind, Transports},
    verification::ImageVerifier,
};
use crate::{
    config::Configuration,
    error::{status, Error, TimeoutError},
    hal::{flash::ReadWrite, time::Milliseconds},
};

pub use super::session::is_terminal;

/// What happened during the last tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// A command was dispatched and succeeded.
    Success,
    /// No frame arrived within the tick.
    NoPacket,
    Error(Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickStatus {
    pub state: State,
    pub last_status: Status,
}

impl Status {
    /// Wire status code matching this tick status.
    pub fn code(&self) -> u8 {
        match self {
            Status::Success | Status::NoPacket => status::SUCCESS,
            Status::Error(error) => error.status_code(),
        }
    }
}

/// Caller facing surface of a DFU session.
pub trait UpdateEngine {
    fn continue_session(&mut self, tick: Milliseconds) -> TickStatus;
    fn switch_transport(&mut self, kind: TransportKind) -> Result<(), Error>;
    /// Drops any partial frame on the active transport.
    fn reset_transport(&mut self);
    /// Returns a terminal session to `Idle`.
    fn reinitialize(&mut self);
    fn session(&self) -> &Session;
}

pub struct Dfu<F, I, U, S, V>
where
    F: ReadWrite,
    I: Transport,
    U: Transport,
    S: Transport,
    V: ImageVerifier,
{
    configuration: Configuration,
    session: Session,
    codec: Codec,
    transports: Transports<I, U, S>,
    store: ImageStore<F>,
    verifier: V,
    dispatcher: Dispatcher,
    packet: [u8; MAX_FRAME_SIZE],
    response: [u8; MAX_FRAME_SIZE],
}

impl<F, I, U, S, V> Dfu<F, I, U, S, V>
where
    F: ReadWrite,
    I: Transport,
    U: Transport,
    S: Transport,
    V: ImageVerifier,
{
    /// Validates `configuration`, then starts the initial transport.
    pub fn init(
        configuration: Configuration,
        mut transports: Transports<I, U, S>,
        flash: F,
        verifier: V,
    ) -> Result<Self, Error> {
        configuration.validate()?;
        let store = ImageStore::new(flash, configuration.row_size)?;
        if !store.region().encloses(configuration.application_region) {
            return Err(Error::Configuration("Application region exceeds flash range"));
        }

        transports.select(configuration.initial_transport);
        transports.start()?;

        Ok(Self {
            session: Session::new(&configuration),
            codec: Codec::new(configuration.checksum_kind, configuration.max_payload),
            dispatcher: Dispatcher::new(configuration.max_payload),
            configuration,
            transports,
            store,
            verifier,
            packet: [0u8; MAX_FRAME_SIZE],
            response: [0u8; MAX_FRAME_SIZE],
        })
    }

    pub fn configuration(&self) -> &Configuration { &self.configuration }
    pub fn store(&self) -> &ImageStore<F> { &self.store }
    pub fn store_mut(&mut self) -> &mut ImageStore<F> { &mut self.store }
    pub fn transports(&self) -> &Transports<I, U, S> { &self.transports }
    pub fn transports_mut(&mut self) -> &mut Transports<I, U, S> { &mut self.transports }

    /// Advances the session by one tick of `tick` duration.
    pub fn continue_session(&mut self, tick: Milliseconds) -> TickStatus {
        if self.session.state.is_terminal() {
            return self.status(Status::NoPacket);
        }

        let last_status = match self.transports.try_receive(&mut self.packet, tick) {
            Ok(Some(frame)) => {
                let length = frame.len();
                self.process(length, tick)
            }
            Ok(None) => self.elapse(tick).unwrap_or(Status::NoPacket),
            Err(error) => self.elapse(tick).unwrap_or(Status::Error(error.into())),
        };
        self.status(last_status)
    }

    /// Moves the session to `kind`. On failure the session stays on the
    /// transport it was using.
    pub fn switch_transport(&mut self, kind: TransportKind) -> Result<(), Error> {
        let result = self.transports.switch(kind);
        self.session.active_transport = self.transports.active();
        result.map_err(Error::from)
    }

    pub fn reset_transport(&mut self) { self.transports.reset(); }

    pub fn reinitialize(&mut self) {
        dfu_info!("Reinitialising DFU session from {:?}", self.session.state);
        self.session.reinitialize();
        self.dispatcher.discard_staged();
        self.verifier.reset();
    }

    pub fn session(&self) -> &Session { &self.session }

    fn status(&self, last_status: Status) -> TickStatus {
        TickStatus { state: self.session.state, last_status }
    }

    /// Accounts for a tick without a dispatched command. Returns the
    /// timeout signal, if one fired.
    fn elapse(&mut self, tick: Milliseconds) -> Option<Status> {
        match self.session.state {
            State::Idle => {
                self.session.elapsed_idle.advance(tick);
                if self.session.elapsed_idle.has_reached(self.configuration.idle_timeout()) {
                    dfu_warn!("Idle for {} ms", self.session.elapsed_idle.elapsed().0);
                    self.session.elapsed_idle.reset();
                    return Some(Status::Error(TimeoutError::Idle.into()));
                }
                None
            }
            State::Updating => {
                self.session.elapsed_command.advance(tick);
                if self.session.elapsed_command.has_reached(self.configuration.command_timeout()) {
                    dfu_error!("No command for {} ms", self.session.elapsed_command.elapsed().0);
                    self.transition(State::Failed);
                    return Some(Status::Error(TimeoutError::Command.into()));
                }
                None
            }
            State::Finished(_) | State::Failed => None,
        }
    }

    /// Decodes and dispatches the frame held in the first `length` bytes of
    /// the packet buffer, and answers it.
    fn process(&mut self, length: usize, tick: Milliseconds) -> Status {
        let packet = match self.codec.decode(&self.packet[..length]) {
            Ok(packet) => packet,
            Err(error) => {
                dfu_warn!("Rejected frame: {:?}", error);
                let error = Error::from(error);
                let response = ResponsePacket { status: error.status_code(), payload: &[] };
                // Answering is best effort; the codec error takes precedence.
                let _ =
                    Self::answer(&self.codec, &mut self.transports, &mut self.response, &response);
                return self.elapse(tick).unwrap_or(Status::Error(error));
            }
        };

        self.session.elapsed_command.reset();
        self.session.elapsed_idle.reset();
        let dispatched = self.dispatcher.dispatch(
            &packet,
            &mut self.session,
            &mut self.store,
            &mut self.verifier,
        );
        let sent = Self::answer(
            &self.codec,
            &mut self.transports,
            &mut self.response,
            &dispatched.response,
        );
        let (opcode, outcome) = (dispatched.opcode, dispatched.outcome);

        match outcome {
            Ok(effect) => {
                match (effect, self.session.state) {
                    (Effect::ApplicationVerified, _) => {
                        self.transition(State::Finished(Outcome::Success))
                    }
                    (Effect::Continue, State::Idle) => self.transition(State::Updating),
                    _ => (),
                }
                match sent {
                    Ok(()) => Status::Success,
                    Err(error) => Status::Error(error),
                }
            }
            Err(error @ Error::Verify(_)) if opcode == Some(Opcode::VerifyApplication) => {
                dfu_error!("Application verification failed: {:?}", error);
                self.transition(State::Finished(Outcome::Failure));
                Status::Error(error)
            }
            Err(error) if error.is_fatal() => {
                dfu_error!("Fatal error: {:?}", error);
                self.transition(State::Failed);
                Status::Error(error)
            }
            Err(error) => {
                dfu_warn!("Command failed: {:?}", error);
                Status::Error(error)
            }
        }
    }

    fn answer(
        codec: &Codec,
        transports: &mut Transports<I, U, S>,
        buffer: &mut [u8],
        response: &ResponsePacket,
    ) -> Result<(), Error> {
        let length = codec.encode(response, buffer)?;
        transports.send(&buffer[..length])?;
        Ok(())
    }

    fn transition(&mut self, to: State) {
        dfu_info!("DFU state {:?} -> {:?}", self.session.state, to);
        self.session.state = to;
    }
}

impl<F, I, U, S, V> UpdateEngine for Dfu<F, I, U, S, V>
where
    F: ReadWrite,
    I: Transport,
    U: Transport,
    S: Transport,
    V: ImageVerifier,
{
    fn continue_session(&mut self, tick: Milliseconds) -> TickStatus {
        Dfu::continue_session(self, tick)
    }

    fn switch_transport(&mut self, kind: TransportKind) -> Result<(), Error> {
        Dfu::switch_transport(self, kind)
    }

    fn reset_transport(&mut self) { Dfu::reset_transport(self) }
    fn reinitialize(&mut self) { Dfu::reinitialize(self) }
    fn session(&self) -> &Session { Dfu::session(self) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::{
            packet::{ChecksumKind, CommandPacket, HEADER_SIZE, SOF},
            transport::Unavailable,
            verification::{crc32_of, Crc32Verifier},
        },
        error::{status, CodecError, FlashError, TransportError, VerifyError},
        hal::doubles::{
            flash::FakeFlash,
            transport::{Call, CallLog, Link, MockTransport},
        },
        utilities::memory::Region,
    };
    use std::{cell::RefCell, rc::Rc};

    const BASE: u32 = 0x1000;
    const TICK: Milliseconds = Milliseconds(20);

    type TestDfu = Dfu<FakeFlash, MockTransport, MockTransport, MockTransport, Crc32Verifier>;

    struct Harness {
        dfu: TestDfu,
        log: CallLog,
        i2c: Rc<RefCell<Link>>,
        uart: Rc<RefCell<Link>>,
        spi: Rc<RefCell<Link>>,
        codec: Codec,
    }

    fn configuration() -> Configuration {
        Configuration {
            application_region: Region::new(BASE, BASE + 0x8000),
            row_size: 64,
            ..Default::default()
        }
    }

    impl Harness {
        fn new(configuration: Configuration) -> Self {
            let log = CallLog::default();
            let i2c = MockTransport::new(TransportKind::I2c, &log);
            let uart = MockTransport::new(TransportKind::Uart, &log);
            let spi = MockTransport::new(TransportKind::Spi, &log);
            let (i2c_link, uart_link, spi_link) = (i2c.link(), uart.link(), spi.link());
            let codec = Codec::new(configuration.checksum_kind, configuration.max_payload);
            let dfu = Dfu::init(
                configuration,
                Transports::new(i2c, uart, spi, TransportKind::I2c),
                FakeFlash::new(BASE, 0x8000),
                Crc32Verifier::new(),
            )
            .unwrap();
            Self { dfu, log, i2c: i2c_link, uart: uart_link, spi: spi_link, codec }
        }

        fn link(&self, kind: TransportKind) -> &Rc<RefCell<Link>> {
            match kind {
                TransportKind::I2c => &self.i2c,
                TransportKind::Uart => &self.uart,
                TransportKind::Spi => &self.spi,
            }
        }

        fn push_raw(&self, frame: Vec<u8>) {
            let kind = self.dfu.transports().active();
            self.link(kind).borrow_mut().incoming.push_back(frame);
        }

        fn encode(&self, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
            let mut buffer = [0u8; MAX_FRAME_SIZE];
            let command = CommandPacket::new(opcode, payload);
            let length = self.codec.encode_command(&command, &mut buffer).unwrap();
            buffer[..length].to_vec()
        }

        fn command(&mut self, opcode: Opcode, payload: &[u8]) -> TickStatus {
            self.push_raw(self.encode(opcode, payload));
            self.dfu.continue_session(TICK)
        }

        fn idle_tick(&mut self) -> TickStatus { self.dfu.continue_session(TICK) }

        /// Status code and payload of the last response sent on the active link.
        fn last_response(&self) -> (u8, Vec<u8>) {
            let kind = self.dfu.transports().active();
            let link = self.link(kind).borrow();
            let raw = link.sent.last().unwrap();
            let response = self.codec.decode_response(raw).unwrap();
            (response.status, response.payload.to_vec())
        }
    }

    fn words(values: &[u32]) -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() }

    #[test]
    fn init_starts_the_initial_transport() {
        // Given
        let configuration = Configuration {
            initial_transport: TransportKind::Uart,
            ..self::configuration()
        };

        // When
        let harness = Harness::new(configuration);

        // Then
        assert_eq!(vec![(TransportKind::Uart, Call::Start)], *harness.log.borrow());
        assert_eq!(TransportKind::Uart, harness.dfu.session().active_transport);
        assert_eq!(State::Idle, harness.dfu.session().state);
    }

    #[test]
    fn init_rejects_invalid_configuration() {
        // Given
        let log = CallLog::default();
        let transports = Transports::new(
            MockTransport::new(TransportKind::I2c, &log),
            MockTransport::new(TransportKind::Uart, &log),
            MockTransport::new(TransportKind::Spi, &log),
            TransportKind::I2c,
        );
        let outside = Configuration {
            application_region: Region::new(BASE, BASE + 0x10000),
            ..configuration()
        };

        // When
        let result =
            Dfu::init(outside, transports, FakeFlash::new(BASE, 0x8000), Crc32Verifier::new());

        // Then
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn sync_moves_idle_to_updating_and_resets_command_timer() {
        // Given
        let mut harness = Harness::new(configuration());
        assert_eq!(Status::NoPacket, harness.idle_tick().last_status);

        // When
        let status = harness.command(Opcode::Sync, &[]);

        // Then
        assert_eq!(TickStatus { state: State::Updating, last_status: Status::Success }, status);

        // When
        (0..3).for_each(|_| {
            harness.idle_tick();
        });

        // Then
        assert_eq!(Milliseconds(60), harness.dfu.session().elapsed_command.elapsed());

        // When
        harness.command(Opcode::Sync, &[]);

        // Then
        assert_eq!(Milliseconds(0), harness.dfu.session().elapsed_command.elapsed());
        assert_eq!(State::Updating, harness.dfu.session().state);
    }

    #[test]
    fn silence_while_updating_fails_after_command_timeout() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.command(Opcode::Sync, &[]);
        let ticks = harness.dfu.configuration().command_timeout_ms / TICK.0;

        // When
        for _ in 0..ticks - 1 {
            assert_eq!(Status::NoPacket, harness.idle_tick().last_status);
        }
        let status = harness.idle_tick();

        // Then
        assert_eq!(
            TickStatus {
                state: State::Failed,
                last_status: Status::Error(Error::Timeout(TimeoutError::Command)),
            },
            status
        );
    }

    #[test]
    fn command_timeout_never_fires_early_on_uneven_ticks() {
        // Given
        let mut harness = Harness::new(Configuration { command_timeout_ms: 50, ..configuration() });
        harness.command(Opcode::Sync, &[]);

        // When
        harness.idle_tick();
        harness.idle_tick();

        // Then
        assert_eq!(State::Updating, harness.dfu.session().state);
        assert_eq!(State::Failed, harness.idle_tick().state);
    }

    #[test]
    fn program_and_verify_scenario() {
        // Given
        let mut harness = Harness::new(configuration());
        let data = [0xAAu8; 64];

        // When
        harness.command(Opcode::SetAddress, &words(&[BASE]));
        let programmed = harness.command(Opcode::ProgramData, &data);

        // Then
        assert_eq!(TickStatus { state: State::Updating, last_status: Status::Success }, programmed);
        let expected_checksum = crc32_of(&data).to_le_bytes().to_vec();
        assert_eq!((status::SUCCESS, expected_checksum), harness.last_response());

        // When
        let verified = harness.command(Opcode::VerifyData, &words(&[BASE, 64, crc32_of(&data)]));

        // Then
        assert_eq!(Status::Success, verified.last_status);
        let mut out = [0u8; 64];
        harness.dfu.store_mut().read(BASE, &mut out).unwrap();
        assert_eq!(data, out);
    }

    #[test]
    fn full_update_finishes_successfully() {
        // Given
        let mut harness = Harness::new(configuration());
        let image: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();
        let mut metadata = words(&[BASE, image.len() as u32]);
        metadata.extend_from_slice(&crc32_of(&image).to_le_bytes());

        // When
        harness.command(Opcode::EnterBootloader, &[]);
        harness.command(Opcode::SendData, &image[..128]);
        harness.command(Opcode::ProgramData, &image[128..]);
        harness.command(Opcode::SetMetadata, &metadata);
        let status = harness.command(Opcode::VerifyApplication, &[]);

        // Then
        assert_eq!(
            TickStatus { state: State::Finished(Outcome::Success), last_status: Status::Success },
            status
        );
        assert!(is_terminal(status.state));
    }

    #[test]
    fn application_mismatch_finishes_with_failure() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.command(Opcode::ProgramData, &[0x42u8; 64]);
        let mut metadata = words(&[BASE, 64]);
        metadata.extend_from_slice(&[0, 0, 0, 0]);
        harness.command(Opcode::SetMetadata, &metadata);
        let before = harness.dfu.store().flash().contents(BASE, 64).to_vec();

        // When
        let status = harness.command(Opcode::VerifyApplication, &[]);

        // Then
        assert_eq!(
            TickStatus {
                state: State::Finished(Outcome::Failure),
                last_status: Status::Error(Error::Verify(VerifyError::ChecksumMismatch)),
            },
            status
        );
        assert_eq!(before, harness.dfu.store().flash().contents(BASE, 64).to_vec());
    }

    #[test]
    fn oversized_frames_are_rejected_without_touching_the_session() {
        // Given
        let mut harness = Harness::new(Configuration { max_payload: 64, ..configuration() });
        let before = *harness.dfu.session();

        // When
        harness.push_raw(vec![SOF, Opcode::ProgramData.code(), 65, 0]);
        let status = harness.idle_tick();

        // Then
        assert_eq!(Status::Error(Error::Codec(CodecError::Length)), status.last_status);
        assert_eq!(status::ERROR_LENGTH, harness.last_response().0);
        assert_eq!(before.current_write_address, harness.dfu.session().current_write_address);
        assert_eq!(State::Idle, harness.dfu.session().state);
        assert_eq!(0, harness.dfu.store().flash().write_count);
    }

    #[test]
    fn tampered_frames_never_reach_the_dispatcher() {
        // Given
        let mut harness = Harness::new(configuration());
        let mut frame = harness.encode(Opcode::SetAddress, &words(&[BASE + 0x100]));
        frame[HEADER_SIZE] ^= 0x01;

        // When
        harness.push_raw(frame);
        let status = harness.idle_tick();

        // Then
        assert_eq!(Status::Error(Error::Codec(CodecError::Checksum)), status.last_status);
        assert_eq!(status::ERROR_CHECKSUM, harness.last_response().0);
        assert_eq!(BASE, harness.dfu.session().current_write_address);
        assert_eq!(State::Idle, status.state);
    }

    #[test]
    fn recoverable_errors_keep_the_update_going() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.command(Opcode::Sync, &[]);

        // When
        let status = harness.command(Opcode::SetAddress, &words(&[0]));

        // Then
        assert_eq!(
            TickStatus { state: State::Updating, last_status: Status::Error(Error::Address) },
            status
        );
        assert_eq!(status::ERROR_ADDRESS, harness.last_response().0);
    }

    #[test]
    fn flash_faults_fail_the_session_until_reinitialised() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.dfu.store_mut().flash_mut().fail_writes = true;

        // When
        let status = harness.command(Opcode::ProgramData, &[0u8; 8]);

        // Then
        assert_eq!(
            TickStatus {
                state: State::Failed,
                last_status: Status::Error(Error::Flash(FlashError::Write)),
            },
            status
        );

        // When (terminal states are sticky)
        let sticky = harness.command(Opcode::Sync, &[]);

        // Then
        assert_eq!(TickStatus { state: State::Failed, last_status: Status::NoPacket }, sticky);
        assert_eq!(1, harness.i2c.borrow().incoming.len());

        // When
        harness.dfu.reinitialize();

        // Then
        assert_eq!(State::Idle, harness.dfu.session().state);
        assert_eq!(State::Updating, harness.idle_tick().state);
    }

    #[test]
    fn idle_timeout_is_signalled_once_per_period() {
        // Given
        let mut harness = Harness::new(Configuration { idle_timeout_ms: 100, ..configuration() });

        // When
        let statuses: Vec<Status> = (0..10).map(|_| harness.idle_tick().last_status).collect();

        // Then
        let timeouts: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| **status == Status::Error(Error::Timeout(TimeoutError::Idle)))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(vec![4, 9], timeouts);
        assert_eq!(State::Idle, harness.dfu.session().state);
    }

    #[test]
    fn switching_rebinds_the_session_transport() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.log.borrow_mut().clear();

        // When
        harness.dfu.switch_transport(TransportKind::Spi).unwrap();

        // Then
        assert_eq!(
            vec![
                (TransportKind::I2c, Call::Reset),
                (TransportKind::I2c, Call::Stop),
                (TransportKind::Spi, Call::Start),
            ],
            *harness.log.borrow()
        );
        assert_eq!(TransportKind::Spi, harness.dfu.session().active_transport);

        // When
        let status = harness.command(Opcode::Sync, &[]);

        // Then
        assert_eq!(Status::Success, status.last_status);
        assert_eq!(1, harness.spi.borrow().sent.len());
        assert!(harness.i2c.borrow().sent.is_empty());
    }

    #[test]
    fn failed_switch_keeps_the_session_on_a_live_transport() {
        // Given
        let log = CallLog::default();
        let i2c = MockTransport::new(TransportKind::I2c, &log);
        let i2c_link = i2c.link();
        let spi = MockTransport::new(TransportKind::Spi, &log);
        let mut dfu = Dfu::init(
            configuration(),
            Transports::new(i2c, Unavailable, spi, TransportKind::I2c),
            FakeFlash::new(BASE, 0x8000),
            Crc32Verifier::new(),
        )
        .unwrap();
        let codec = Codec::new(ChecksumKind::Additive, configuration().max_payload);
        let mut raw = [0u8; MAX_FRAME_SIZE];
        let sync = CommandPacket::new(Opcode::Sync, &[]);
        let length = codec.encode_command(&sync, &mut raw).unwrap();

        // When
        let result = dfu.switch_transport(TransportKind::Uart);

        // Then
        assert_eq!(Err(Error::Transport(TransportError::NotStarted)), result);
        assert_eq!(TransportKind::I2c, dfu.session().active_transport);
        assert_eq!(dfu.transports().active(), dfu.session().active_transport);

        // When
        i2c_link.borrow_mut().incoming.push_back(raw[..length].to_vec());
        let status = dfu.continue_session(TICK);

        // Then
        assert_eq!(TickStatus { state: State::Updating, last_status: Status::Success }, status);
        assert_eq!(1, i2c_link.borrow().sent.len());
    }

    #[test]
    fn failed_response_is_reported_as_transport_error() {
        // Given
        let mut harness = Harness::new(configuration());
        harness.i2c.borrow_mut().fail_sends = true;

        // When
        let status = harness.command(Opcode::Sync, &[]);

        // Then
        assert_eq!(
            TickStatus {
                state: State::Updating,
                last_status: Status::Error(Error::Transport(TransportError::SendFailed)),
            },
            status
        );
    }
}
