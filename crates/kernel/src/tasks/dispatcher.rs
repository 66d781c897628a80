// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The command dispatcher: a strictly ordered, single-flight queue of commands, each run as a
//! [`Task`] to completion before the next is popped.
//!
//! Everything reaches the dispatcher through one channel: commands from host links, commands the
//! engine schedules for itself, and signal-driven shutdown requests. The dispatcher owns its
//! timers, so nothing ever interrupts a running task.

use crate::config::Config;
use crate::connections::PlayerConnTable;
use crate::outbound::Outbound;
use crate::tasks::commands::CommandTable;
use crate::tasks::dispatcher_client::{DispatcherClient, DispatcherMsg};
use crate::tasks::task::{QueuedCommand, Task, TaskId};
use crate::tasks::{EngineState, ShutdownOutcome};
use flume::{Receiver, RecvTimeoutError, TryRecvError};
use rand::Rng;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use twine_common::tasks::Command;
use twine_db::PropStore;

enum Timer {
    Command(Command),
    Sweep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub tasks_run: u64,
    pub handle_failures: u64,
    pub resolve_failures: u64,
}

pub struct Dispatcher {
    receiver: Receiver<DispatcherMsg>,
    queue: VecDeque<QueuedCommand>,
    commands: CommandTable,
    state: EngineState,
    store: Arc<dyn PropStore>,
    timers: BTreeMap<(Instant, u64), Timer>,
    timer_seq: u64,
    next_task_id: TaskId,
    busy: bool,
    halted: bool,
    stats: DispatcherStats,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn PropStore>,
        outbound: Arc<dyn Outbound>,
        commands: CommandTable,
    ) -> (Self, DispatcherClient) {
        let (sender, receiver) = flume::unbounded();
        let client = DispatcherClient::new(sender);
        let state = EngineState {
            players: PlayerConnTable::new(),
            outbound,
            client: client.clone(),
            config,
            shutdown: None,
        };
        let dispatcher = Self {
            receiver,
            queue: VecDeque::new(),
            commands,
            state,
            store,
            timers: BTreeMap::new(),
            timer_seq: 0,
            next_task_id: 1,
            busy: false,
            halted: false,
            stats: DispatcherStats::default(),
        };
        (dispatcher, client)
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn players(&self) -> &PlayerConnTable {
        &self.state.players
    }

    pub fn players_mut(&mut self) -> &mut PlayerConnTable {
        &mut self.state.players
    }

    /// Run until shutdown. Meant to be the body of the dispatcher's own thread.
    pub fn run(mut self) -> ShutdownOutcome {
        info!("Dispatcher started");
        self.arm_sweep();
        loop {
            if let Some(outcome) = self.run_pending() {
                info!(?outcome, stats = ?self.stats, "Dispatcher done");
                return outcome;
            }
            let received = match self.timers.keys().next() {
                Some((deadline, _)) => match self.receiver.recv_deadline(*deadline) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return ShutdownOutcome::Halted,
                },
                None => match self.receiver.recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => return ShutdownOutcome::Halted,
                },
            };
            if let Some(msg) = received {
                self.accept(msg);
            }
        }
    }

    /// Take in everything waiting on the channel, fire due timers, and run queued commands until
    /// the queue is empty. Returns the outcome if the dispatcher has finished.
    pub fn run_pending(&mut self) -> Option<ShutdownOutcome> {
        loop {
            self.drain_channel();
            if self.halted {
                return Some(ShutdownOutcome::Halted);
            }
            self.fire_due_timers();
            if self.queue.is_empty() {
                return None;
            }
            if let Some(outcome) = self.run_next() {
                return Some(outcome);
            }
        }
    }

    fn drain_channel(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => self.accept(msg),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.halted = true;
                    return;
                }
            }
        }
    }

    fn accept(&mut self, msg: DispatcherMsg) {
        match msg {
            DispatcherMsg::Enqueue(queued) => {
                if self.state.client.is_shutting_down() {
                    info!(cmd = queued.command.name(), "Dropping command; server is shutting down");
                    return;
                }
                self.queue.push_back(queued);
            }
            DispatcherMsg::Urgent(queued) => {
                if self.state.client.is_shutting_down() {
                    info!(cmd = queued.command.name(), "Dropping command; server is shutting down");
                    return;
                }
                self.queue.push_front(queued);
            }
            DispatcherMsg::Schedule { command, delay } => {
                self.add_timer(delay, Timer::Command(command));
            }
            DispatcherMsg::Halt => {
                self.halted = true;
            }
        }
    }

    fn add_timer(&mut self, delay: Duration, timer: Timer) {
        let Some(at) = Instant::now().checked_add(delay) else {
            match timer {
                Timer::Command(command) => {
                    error!(cmd = command.name(), ?delay, "Delay out of range; dropping command")
                }
                Timer::Sweep => error!(?delay, "Sweep interval out of range; sweeps are disabled"),
            }
            return;
        };
        self.timer_seq += 1;
        self.timers.insert((at, self.timer_seq), timer);
    }

    fn arm_sweep(&mut self) {
        let config = &self.state.config;
        let jitter_ms = u64::try_from(config.sweep_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        let delay = config.sweep_interval.saturating_add(jitter);
        self.add_timer(delay, Timer::Sweep);
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            match entry.remove() {
                Timer::Command(command) => {
                    if self.state.client.is_shutting_down() {
                        info!(cmd = command.name(), "Dropping delayed command; server is shutting down");
                        continue;
                    }
                    self.queue.push_back(QueuedCommand::internal(command));
                }
                Timer::Sweep => {
                    self.queue
                        .push_back(QueuedCommand::internal(Command::new("checkdisconnected")));
                    self.arm_sweep();
                }
            }
        }
    }

    /// Pop the head of the queue and take it through handle, resolve and close. Returns the
    /// outcome if the task asked for shutdown.
    fn run_next(&mut self) -> Option<ShutdownOutcome> {
        if self.busy {
            error!("Dispatcher re-entered while a task was running");
            return None;
        }
        let queued = self.queue.pop_front()?;
        self.busy = true;

        let task_id = self.next_task_id;
        self.next_task_id += 1;
        let mut task = Task::new(task_id, queued, self.store.clone());
        let cmd = task.command().name().to_string();

        let handled = catch_unwind(AssertUnwindSafe(|| {
            task.handle(&self.commands, &mut self.state)
        }));
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.handle_failures += 1;
                error!(task_id, cmd = %cmd, "Error handling command: {e}");
            }
            Err(panic) => {
                self.stats.handle_failures += 1;
                error!(task_id, cmd = %cmd, "Command handler panicked: {}", panic_message(&*panic));
            }
        }

        if task.is_writable() {
            let resolved = catch_unwind(AssertUnwindSafe(|| task.resolve(&self.state)));
            match resolved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.resolve_failures += 1;
                    error!(task_id, cmd = %cmd, "Error resolving command: {e}");
                }
                Err(panic) => {
                    self.stats.resolve_failures += 1;
                    error!(task_id, cmd = %cmd, "Command resolve panicked: {}", panic_message(&*panic));
                }
            }
        }

        let queued_for = task.started_at().saturating_duration_since(task.enqueued_at());
        let elapsed = task.started_at().elapsed();
        info!(
            task_id,
            cmd = %cmd,
            "Finished command in {:.3} ms (queued for {:.3} ms)",
            millis(elapsed),
            millis(queued_for)
        );
        self.stats.tasks_run += 1;
        self.busy = false;
        task.close();

        let outcome = self.state.shutdown.take()?;
        Some(self.shut_down(outcome))
    }

    fn shut_down(&mut self, outcome: ShutdownOutcome) -> ShutdownOutcome {
        if !self.queue.is_empty() {
            warn!(dropped = self.queue.len(), "Discarding queued commands at shutdown");
            self.queue.clear();
        }
        if !self.timers.is_empty() {
            debug!(dropped = self.timers.len(), "Discarding timers at shutdown");
            self.timers.clear();
        }
        self.state.outbound.close_all();
        let grace = self.state.config.shutdown_grace;
        info!(?grace, ?outcome, "Waiting for outbound writes to drain");
        std::thread::sleep(grace);
        outcome
    }
}
