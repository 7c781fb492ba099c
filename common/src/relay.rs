use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{RelaySwitch, SwitchState, SwitchType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayCommand {
    pub pin_index: u8,
    pub state: SwitchState,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay pin {pin_index} did not accept '{state}': {reason}")]
    Command {
        pin_index: u8,
        state: SwitchState,
        reason: String,
    },
    #[error("relay state query failed: {0}")]
    Status(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayFailure {
    pub command: RelayCommand,
    pub reason: String,
}

/// What a single `activate` call did. Failures are per switch and never abort
/// the remaining commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationReport {
    pub issued: Vec<RelayCommand>,
    pub failures: Vec<RelayFailure>,
}

impl ActivationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.issued.is_empty() && self.failures.is_empty()
    }
}

/// Transport to the physical relay board.
#[async_trait]
pub trait SwitchDriver: Send + Sync {
    async fn send(&self, command: RelayCommand) -> Result<(), RelayError>;

    /// Hardware state, positionally aligned with the configured switch list.
    async fn status(&self) -> Result<Vec<bool>, RelayError>;
}

#[async_trait]
pub trait RelayActuator: Send {
    fn switches(&self) -> &[RelaySwitch];

    /// Switches on every switch of `switch_type` and off every other switch.
    async fn activate(&mut self, switch_type: SwitchType) -> ActivationReport;

    fn any_active(&self, switch_type: SwitchType) -> bool {
        self.switches()
            .iter()
            .any(|switch| switch.switch_type == switch_type && switch.active)
    }

    fn any_inactive(&self, switch_type: SwitchType) -> bool {
        self.switches()
            .iter()
            .any(|switch| switch.switch_type == switch_type && !switch.active)
    }

    fn any_active_except(&self, switch_type: SwitchType) -> bool {
        self.switches()
            .iter()
            .any(|switch| switch.switch_type != switch_type && switch.active)
    }
}

/// Commands needed to reach `target`: every OFF before any ON, skipping
/// switches already in the wanted state.
pub fn plan_activation(switches: &[RelaySwitch], target: SwitchType) -> Vec<RelayCommand> {
    let offs = switches
        .iter()
        .filter(|switch| !target.selects(switch) && switch.active)
        .map(|switch| RelayCommand {
            pin_index: switch.pin_index,
            state: SwitchState::Off,
        });
    let ons = switches
        .iter()
        .filter(|switch| target.selects(switch) && !switch.active)
        .map(|switch| RelayCommand {
            pin_index: switch.pin_index,
            state: SwitchState::On,
        });

    offs.chain(ons).collect()
}

pub struct RelayBank<D> {
    switches: Vec<RelaySwitch>,
    driver: D,
}

impl<D: SwitchDriver> RelayBank<D> {
    pub fn new(switches: Vec<RelaySwitch>, driver: D) -> Self {
        Self { switches, driver }
    }

    /// Overwrites `active` flags with what the board reports.
    pub async fn resync(&mut self) -> Result<(), RelayError> {
        let status = self.driver.status().await?;
        if status.len() != self.switches.len() {
            warn!(
                reported = status.len(),
                configured = self.switches.len(),
                "relay board reported a different number of switches"
            );
        }
        for (switch, active) in self.switches.iter_mut().zip(status) {
            switch.active = active;
        }
        Ok(())
    }

    fn mark(&mut self, command: RelayCommand) {
        for switch in self
            .switches
            .iter_mut()
            .filter(|switch| switch.pin_index == command.pin_index)
        {
            switch.active = command.state.is_on();
        }
    }
}

#[async_trait]
impl<D: SwitchDriver> RelayActuator for RelayBank<D> {
    fn switches(&self) -> &[RelaySwitch] {
        &self.switches
    }

    async fn activate(&mut self, switch_type: SwitchType) -> ActivationReport {
        let plan = plan_activation(&self.switches, switch_type);
        let mut report = ActivationReport::default();
        if plan.is_empty() {
            debug!(%switch_type, "relays already in requested state");
            return report;
        }

        for command in plan {
            match self.driver.send(command).await {
                Ok(()) => {
                    debug!(pin = command.pin_index, state = %command.state, "relay switched");
                    self.mark(command);
                    report.issued.push(command);
                }
                Err(err) => {
                    warn!("relay command failed: {err}");
                    report.failures.push(RelayFailure {
                        command,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Err(err) = self.resync().await {
            warn!("relay resync after activate({switch_type}) failed: {err}");
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// In-memory board that records commands and can refuse chosen pins.
    #[derive(Clone, Default)]
    pub struct FakeBoard {
        pub sent: Arc<Mutex<Vec<RelayCommand>>>,
        pub failing: Arc<Mutex<HashSet<u8>>>,
        pub status: Arc<Mutex<Option<Vec<bool>>>>,
    }

    impl FakeBoard {
        pub fn sent(&self) -> Vec<RelayCommand> {
            self.sent.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }

        pub fn fail_pin(&self, pin: u8) {
            self.failing.lock().unwrap().insert(pin);
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl SwitchDriver for FakeBoard {
        async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
            if self.failing.lock().unwrap().contains(&command.pin_index) {
                return Err(RelayError::Command {
                    pin_index: command.pin_index,
                    state: command.state,
                    reason: "connection refused".to_string(),
                });
            }
            self.sent.lock().unwrap().push(command);
            Ok(())
        }

        async fn status(&self) -> Result<Vec<bool>, RelayError> {
            self.status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| RelayError::Status("no status endpoint".to_string()))
        }
    }

    pub fn switches() -> Vec<RelaySwitch> {
        vec![
            RelaySwitch {
                pin_index: 1,
                switch_type: SwitchType::Cool,
                active: false,
            },
            RelaySwitch {
                pin_index: 2,
                switch_type: SwitchType::Heat,
                active: false,
            },
            RelaySwitch {
                pin_index: 3,
                switch_type: SwitchType::Heat,
                active: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::testing::{switches, FakeBoard};
    use super::*;

    fn on(pin_index: u8) -> RelayCommand {
        RelayCommand {
            pin_index,
            state: SwitchState::On,
        }
    }

    fn off(pin_index: u8) -> RelayCommand {
        RelayCommand {
            pin_index,
            state: SwitchState::Off,
        }
    }

    #[test]
    fn plan_turns_everything_off_before_switching_on() {
        let mut switches = switches();
        switches[0].active = true;

        let plan = plan_activation(&switches, SwitchType::Heat);

        assert_eq!(plan, vec![off(1), on(2), on(3)]);
    }

    #[test]
    fn none_plan_only_switches_off() {
        let mut switches = switches();
        switches[1].active = true;
        switches[2].active = true;

        let plan = plan_activation(&switches, SwitchType::None);

        assert_eq!(plan, vec![off(2), off(3)]);
    }

    #[tokio::test]
    async fn activate_twice_issues_nothing_the_second_time() {
        let board = FakeBoard::default();
        let mut bank = RelayBank::new(switches(), board.clone());

        let first = bank.activate(SwitchType::Heat).await;
        let second = bank.activate(SwitchType::Heat).await;

        assert_eq!(first.issued, vec![on(2), on(3)]);
        assert!(second.is_noop());
        assert_eq!(board.sent().len(), 2);
        assert!(bank.any_active(SwitchType::Heat));
        assert!(!bank.any_active(SwitchType::Cool));
    }

    #[tokio::test]
    async fn failed_switch_is_reported_and_others_proceed() {
        let board = FakeBoard::default();
        board.fail_pin(2);
        let mut bank = RelayBank::new(switches(), board.clone());

        let report = bank.activate(SwitchType::Heat).await;

        assert!(!report.is_success());
        assert_eq!(report.issued, vec![on(3)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].command, on(2));
        assert!(bank.any_inactive(SwitchType::Heat));
    }

    #[tokio::test]
    async fn resync_overwrites_tracked_state() {
        let board = FakeBoard::default();
        *board.status.lock().unwrap() = Some(vec![true, false, true]);
        let mut bank = RelayBank::new(switches(), board);

        bank.resync().await.unwrap();

        let active: Vec<bool> = bank.switches().iter().map(|s| s.active).collect();
        assert_eq!(active, vec![true, false, true]);
    }

    #[tokio::test]
    async fn activate_adopts_board_state_after_commands() {
        let board = FakeBoard::default();
        *board.status.lock().unwrap() = Some(vec![false, true, false]);
        let mut bank = RelayBank::new(switches(), board);

        bank.activate(SwitchType::Heat).await;

        // The board says pin 3 did not latch.
        assert!(bank.any_inactive(SwitchType::Heat));
    }
}
