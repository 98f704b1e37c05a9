//! Process-wide connectivity state.
//!
//! Two values, not persisted — the state is recomputed from a live probe on
//! every process start, and thereafter driven by boundary signals from the
//! host environment. The offline→online transition is what arms the sync
//! coordinator.

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Offline,
}

impl ConnectivityState {
  pub fn is_online(&self) -> bool {
    matches!(self, ConnectivityState::Online)
  }
}

/// A state change worth acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  CameOnline,
  WentOffline,
}

/// Tracks the current state and reports transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  state: ConnectivityState,
}

impl ConnectivityMonitor {
  pub fn new(initial: ConnectivityState) -> Self {
    Self { state: initial }
  }

  pub fn state(&self) -> ConnectivityState {
    self.state
  }

  /// Record an observed state; returns the transition, if any.
  pub fn observe(&mut self, state: ConnectivityState) -> Option<Transition> {
    let transition = match (self.state, state) {
      (ConnectivityState::Offline, ConnectivityState::Online) => Some(Transition::CameOnline),
      (ConnectivityState::Online, ConnectivityState::Offline) => Some(Transition::WentOffline),
      _ => None,
    };
    self.state = state;
    transition
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_to_online_transition() {
    let mut monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
    assert_eq!(
      monitor.observe(ConnectivityState::Online),
      Some(Transition::CameOnline)
    );
    assert!(monitor.state().is_online());
  }

  #[test]
  fn test_repeated_signal_is_not_a_transition() {
    let mut monitor = ConnectivityMonitor::new(ConnectivityState::Online);
    assert_eq!(monitor.observe(ConnectivityState::Online), None);
    assert_eq!(
      monitor.observe(ConnectivityState::Offline),
      Some(Transition::WentOffline)
    );
    assert_eq!(monitor.observe(ConnectivityState::Offline), None);
  }
}
