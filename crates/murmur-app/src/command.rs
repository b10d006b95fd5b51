//! Bounded command bus connecting control surfaces to the simulation loop.

use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, detect_backoff_cfg};
use murmur_core::{ControlCommand, FlockWorld, apply_control_command};
use tracing::{debug, warn};

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;

pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Apply every queued command to the world. Runs at tick boundaries while
/// the caller holds the world lock.
pub fn drain_pending_commands(receiver: &CommandReceiver, world: &mut FlockWorld) {
    loop {
        match receiver.try_recv() {
            Ok(command) => {
                debug!(?command, "applying control command");
                if let Err(error) = apply_control_command(world, command) {
                    warn!(%error, "rejected control command");
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}
