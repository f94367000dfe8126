use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// The lifecycle phase of a protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolState {
    Handshake = 0,
    Status = 1,
    Login = 2,
    Play = 3,
    Disconnected = 4,
}

impl ProtocolState {
    pub fn from_handshake_next(next: i32) -> Option<Self> {
        match next {
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProtocolState::Handshake,
            1 => ProtocolState::Status,
            2 => ProtocolState::Login,
            3 => ProtocolState::Play,
            _ => ProtocolState::Disconnected,
        }
    }

    /// The handshake field sent to pick the follow-up state.
    pub fn handshake_next(self) -> Option<i32> {
        match self {
            ProtocolState::Status => Some(1),
            ProtocolState::Login => Some(2),
            _ => None,
        }
    }

    /// Frame cap for this state. Pre-play exchanges are tiny; anything
    /// larger than the cap is a misbehaving peer.
    pub fn max_frame_len(self) -> usize {
        match self {
            ProtocolState::Handshake | ProtocolState::Status => 1 << 16,
            _ => 1 << 21,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: ProtocolState,
        to: ProtocolState,
    },
    #[error("packet only legal in {expected:?}, connection is in {actual:?}")]
    WrongState {
        expected: ProtocolState,
        actual: ProtocolState,
    },
}

/// Tracks the connection's protocol state and enforces legal transitions.
///
/// The state cell is atomic: during normal operation it is read and written
/// on the dispatch task, but error paths on the I/O task may force it to
/// Disconnected at any time, and game logic may read it concurrently. Does
/// no I/O itself; it only gates legality.
pub struct ConnectionStateMachine {
    state: AtomicU8,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ProtocolState::Handshake as u8),
        }
    }

    pub fn current(&self) -> ProtocolState {
        ProtocolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_disconnected(&self) -> bool {
        self.current() == ProtocolState::Disconnected
    }

    /// Move to `to` if the transition table allows it; on failure the state
    /// is left untouched.
    pub fn transition(&self, to: ProtocolState) -> Result<(), StateError> {
        let mut from = self.current();
        loop {
            if !allowed(from, to) {
                return Err(StateError::IllegalTransition { from, to });
            }
            match self.state.compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                // Raced with another transition; re-check from the new state.
                Err(actual) => from = ProtocolState::from_u8(actual),
            }
        }
    }

    /// Force Disconnected from any state. Idempotent; returns the state the
    /// connection was in.
    pub fn force_disconnect(&self) -> ProtocolState {
        ProtocolState::from_u8(
            self.state
                .swap(ProtocolState::Disconnected as u8, Ordering::AcqRel),
        )
    }

    /// Check that the current state matches before sending a state-specific
    /// packet.
    pub fn expect(&self, expected: ProtocolState) -> Result<(), StateError> {
        let actual = self.current();
        if actual != expected {
            return Err(StateError::WrongState { expected, actual });
        }
        Ok(())
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn allowed(from: ProtocolState, to: ProtocolState) -> bool {
    use ProtocolState::*;
    match (from, to) {
        (Handshake, Status) | (Handshake, Login) => true,
        (Login, Play) => true,
        // Every live state may end; Disconnected is terminal.
        (Disconnected, _) => false,
        (_, Disconnected) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_branches() {
        let machine = ConnectionStateMachine::new();
        machine.transition(ProtocolState::Status).unwrap();
        assert_eq!(machine.current(), ProtocolState::Status);

        let machine = ConnectionStateMachine::new();
        machine.transition(ProtocolState::Login).unwrap();
        machine.transition(ProtocolState::Play).unwrap();
        machine.transition(ProtocolState::Disconnected).unwrap();
        assert!(machine.is_disconnected());
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let machine = ConnectionStateMachine::new();
        machine.transition(ProtocolState::Login).unwrap();
        machine.transition(ProtocolState::Play).unwrap();

        let err = machine.transition(ProtocolState::Login).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                from: ProtocolState::Play,
                to: ProtocolState::Login,
            }
        );
        assert_eq!(machine.current(), ProtocolState::Play);

        // Handshake cannot jump straight to play either.
        let machine = ConnectionStateMachine::new();
        assert!(machine.transition(ProtocolState::Play).is_err());
        assert_eq!(machine.current(), ProtocolState::Handshake);
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let machine = ConnectionStateMachine::new();
        machine.force_disconnect();
        for to in [
            ProtocolState::Handshake,
            ProtocolState::Status,
            ProtocolState::Login,
            ProtocolState::Play,
        ] {
            assert!(machine.transition(to).is_err());
        }
    }

    #[test]
    fn test_force_disconnect_from_any_thread() {
        let machine = std::sync::Arc::new(ConnectionStateMachine::new());
        machine.transition(ProtocolState::Login).unwrap();

        let remote = machine.clone();
        let handle = std::thread::spawn(move || remote.force_disconnect());
        let was = handle.join().unwrap();
        assert_eq!(was, ProtocolState::Login);
        assert!(machine.is_disconnected());
        // Idempotent.
        assert_eq!(machine.force_disconnect(), ProtocolState::Disconnected);
    }

    #[test]
    fn test_expect() {
        let machine = ConnectionStateMachine::new();
        machine.transition(ProtocolState::Status).unwrap();
        assert!(machine.expect(ProtocolState::Status).is_ok());
        assert_eq!(
            machine.expect(ProtocolState::Play).unwrap_err(),
            StateError::WrongState {
                expected: ProtocolState::Play,
                actual: ProtocolState::Status,
            }
        );
    }

    #[test]
    fn test_frame_caps() {
        assert!(ProtocolState::Status.max_frame_len() < ProtocolState::Play.max_frame_len());
    }
}
