use crate::{Error, Result};

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { services_discovered: bool },
    Disconnecting,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected {
                services_discovered: true
            }
        )
    }
}

/// Transition rules of the connection lifecycle.
///
/// Every connect attempt gets a new generation. Completions carrying an older
/// generation belong to a link that has since been torn down and are ignored.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: ConnectionState,
    generation: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
        }
    }
}

impl StateMachine {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start a connect attempt.
    ///
    /// `Ok(None)` when already connected. `AlreadyConnecting` and
    /// `AlreadyDisconnecting` tell the caller to join the transition in progress.
    pub(crate) fn begin_connect(&mut self) -> Result<Option<u64>> {
        match self.state {
            ConnectionState::Disconnected => {
                self.generation += 1;
                self.state = ConnectionState::Connecting;
                Ok(Some(self.generation))
            }
            ConnectionState::Connecting => Err(Error::AlreadyConnecting),
            ConnectionState::Connected { .. } => Ok(None),
            ConnectionState::Disconnecting => Err(Error::AlreadyDisconnecting),
        }
    }

    /// The driver reported a link for attempt `generation`.
    pub(crate) fn link_established(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected {
            services_discovered: false,
        };
        true
    }

    /// Discovery finished for attempt `generation`.
    pub(crate) fn services_discovered(&mut self, generation: u64) -> bool {
        if self.generation != generation
            || !matches!(self.state, ConnectionState::Connected { .. })
        {
            return false;
        }
        self.state = ConnectionState::Connected {
            services_discovered: true,
        };
        true
    }

    /// Attempt `generation` failed before it was ready.
    pub(crate) fn connect_failed(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected {
                services_discovered: false,
            } => {
                self.state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Start tearing the link down.
    ///
    /// With `expected` set, only the link of that generation is torn down, so a
    /// late loss report cannot take out a newer connection. `Ok(None)` means
    /// there is nothing to tear down.
    pub(crate) fn begin_disconnect(&mut self, expected: Option<u64>) -> Result<Option<u64>> {
        if expected.map_or(false, |generation| generation != self.generation) {
            return Ok(None);
        }
        match self.state {
            ConnectionState::Disconnected => Ok(None),
            ConnectionState::Disconnecting => Err(Error::AlreadyDisconnecting),
            ConnectionState::Connecting | ConnectionState::Connected { .. } => {
                self.state = ConnectionState::Disconnecting;
                Ok(Some(self.generation))
            }
        }
    }

    pub(crate) fn finish_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Generation of the current link if GATT operations may be issued on it.
    pub(crate) fn ready(&self) -> Result<u64> {
        if self.state.is_ready() {
            Ok(self.generation)
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Whether `generation` is the link currently up (connected, with or
    /// without services).
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && matches!(self.state, ConnectionState::Connected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> (StateMachine, u64) {
        let mut machine = StateMachine::default();
        let generation = machine.begin_connect().unwrap().unwrap();
        assert!(machine.link_established(generation));
        assert!(machine.services_discovered(generation));
        (machine, generation)
    }

    #[test]
    fn full_lifecycle() {
        let (mut machine, generation) = connected();
        assert_eq!(machine.ready(), Ok(generation));

        assert_eq!(machine.begin_disconnect(None), Ok(Some(generation)));
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
        assert_eq!(machine.ready(), Err(Error::NotConnected));

        machine.finish_disconnect();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn duplicate_transitions_join() {
        let mut machine = StateMachine::default();
        machine.begin_connect().unwrap();
        assert_eq!(machine.begin_connect(), Err(Error::AlreadyConnecting));

        machine.begin_disconnect(None).unwrap();
        assert_eq!(machine.begin_disconnect(None), Err(Error::AlreadyDisconnecting));
        assert_eq!(machine.begin_connect(), Err(Error::AlreadyDisconnecting));

        machine.finish_disconnect();
        assert_eq!(machine.begin_disconnect(None), Ok(None));
    }

    #[test]
    fn connected_connect_is_a_no_op() {
        let (mut machine, _) = connected();
        assert_eq!(machine.begin_connect(), Ok(None));
    }

    #[test]
    fn operations_wait_for_discovery() {
        let mut machine = StateMachine::default();
        let generation = machine.begin_connect().unwrap().unwrap();
        assert_eq!(machine.ready(), Err(Error::NotConnected));

        machine.link_established(generation);
        assert_eq!(
            machine.state(),
            ConnectionState::Connected {
                services_discovered: false
            }
        );
        assert_eq!(machine.ready(), Err(Error::NotConnected));
        assert!(machine.is_live(generation));
    }

    #[test]
    fn superseded_attempt_cannot_complete() {
        let mut machine = StateMachine::default();
        let stale = machine.begin_connect().unwrap().unwrap();
        machine.begin_disconnect(None).unwrap();

        assert!(!machine.link_established(stale));
        assert!(!machine.connect_failed(stale));
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
    }

    #[test]
    fn stale_loss_report_is_ignored() {
        let (mut machine, old) = connected();
        machine.begin_disconnect(None).unwrap();
        machine.finish_disconnect();

        let mut fresh = machine.begin_connect().unwrap().unwrap();
        machine.link_established(fresh);
        machine.services_discovered(fresh);
        assert_ne!(old, fresh);

        assert_eq!(machine.begin_disconnect(Some(old)), Ok(None));
        assert!(machine.state().is_ready());

        fresh = machine.begin_disconnect(Some(fresh)).unwrap().unwrap();
        assert!(!machine.is_live(fresh));
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut machine = StateMachine::default();
        let generation = machine.begin_connect().unwrap().unwrap();
        machine.link_established(generation);
        assert!(machine.connect_failed(generation));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn arbitrary_call_sequences_stay_in_known_states() {
        // Every sequence of 6 calls drawn from connect, disconnect, finish and a
        // full successful connect.
        for mut seed in 0..4u32.pow(6) {
            let mut machine = StateMachine::default();
            for _ in 0..6 {
                match seed % 4 {
                    0 => {
                        let _ = machine.begin_connect();
                    }
                    1 => {
                        let _ = machine.begin_disconnect(None);
                    }
                    2 => {
                        if machine.state() == ConnectionState::Disconnecting {
                            machine.finish_disconnect();
                        }
                    }
                    _ => {
                        if let Ok(Some(generation)) = machine.begin_connect() {
                            machine.link_established(generation);
                            machine.services_discovered(generation);
                        }
                    }
                }
                seed /= 4;

                match machine.state() {
                    ConnectionState::Disconnected => {
                        assert_eq!(machine.begin_disconnect(None), Ok(None));
                    }
                    ConnectionState::Disconnecting => {
                        assert_eq!(machine.begin_connect(), Err(Error::AlreadyDisconnecting));
                    }
                    ConnectionState::Connecting => {
                        assert_eq!(machine.begin_connect(), Err(Error::AlreadyConnecting));
                    }
                    ConnectionState::Connected { .. } => {
                        assert_eq!(machine.begin_connect(), Ok(None));
                    }
                }
            }
        }
    }
}
