use crate::{
    devices::transport::{Transport, TransportKind},
    error::TransportError,
    hal::time::Milliseconds,
};
use std::{cell::RefCell, collections::VecDeque, rc::Rc, vec::Vec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
    Reset,
    Send,
}

/// Ordered record of the calls received by every mock sharing it.
pub type CallLog = Rc<RefCell<Vec<(TransportKind, Call)>>>;

/// State shared between a [`MockTransport`] and the test driving it.
#[derive(Debug, Default)]
pub struct Link {
    /// Frames delivered by successive receive calls, one per call.
    pub incoming: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
    pub started: bool,
    pub fail_sends: bool,
}

/// Frame level transport, scripted through its [`Link`].
pub struct MockTransport {
    kind: TransportKind,
    link: Rc<RefCell<Link>>,
    log: CallLog,
}

impl MockTransport {
    pub fn new(kind: TransportKind, log: &CallLog) -> Self {
        Self { kind, link: Rc::default(), log: Rc::clone(log) }
    }

    pub fn link(&self) -> Rc<RefCell<Link>> { Rc::clone(&self.link) }

    fn record(&self, call: Call) { self.log.borrow_mut().push((self.kind, call)); }
}

impl Transport for MockTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        self.record(Call::Start);
        self.link.borrow_mut().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.record(Call::Stop);
        self.link.borrow_mut().started = false;
    }

    fn reset(&mut self) { self.record(Call::Reset); }

    fn try_receive<'b>(
        &mut self,
        buffer: &'b mut [u8],
        _: Milliseconds,
    ) -> Result<Option<&'b [u8]>, TransportError> {
        let mut link = self.link.borrow_mut();
        if !link.started {
            return Err(TransportError::NotStarted);
        }
        match link.incoming.pop_front() {
            Some(frame) => {
                let length = frame.len().min(buffer.len());
                buffer[..length].copy_from_slice(&frame[..length]);
                Ok(Some(&buffer[..length]))
            }
            None => Ok(None),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.record(Call::Send);
        let mut link = self.link.borrow_mut();
        if !link.started {
            return Err(TransportError::NotStarted);
        }
        if link.fail_sends {
            return Err(TransportError::SendFailed);
        }
        link.sent.push(bytes.to_vec());
        Ok(())
    }
}
