use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, trace};

use crate::block::BlockRef;
use crate::host::{ReceiverRef, Stage};
use crate::val::Val;

use super::config::SchedulerConfig;
use super::process::Process;

/// Handle of a process registered with a [`ThreadManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry {
    id: ProcessId,
    top_block: BlockRef,
    // Stop requested while the process was taken out for stepping.
    stop_requested: bool,
    // `None` while the process is running its step.
    process: Option<Process>,
}

impl Entry {
    fn is_running(&self) -> bool {
        match &self.process {
            Some(process) => process.is_running(),
            None => !self.stop_requested,
        }
    }
}

/// Owns every process of one stage and steps them round-robin.
///
/// While a process runs its burst it is taken out of its entry, so the
/// process can start, stop and query its siblings through the manager.
pub struct ThreadManager {
    entries: Vec<Entry>,
    stage: Rc<dyn Stage>,
    config: SchedulerConfig,
    next_id: u64,
    last_answer: Val,
}

impl ThreadManager {
    pub fn new(stage: Rc<dyn Stage>, config: SchedulerConfig) -> Self {
        Self {
            entries: Vec::new(),
            stage,
            config,
            next_id: 1,
            last_answer: Val::Nil,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stage(&self) -> &Rc<dyn Stage> {
        &self.stage
    }

    /// Starts the script at `top` against `receiver`.
    ///
    /// If a process for the same script is already running and
    /// `is_thread_safe` is set, that process is kept and its id returned.
    /// Otherwise any existing process for the script is stopped and replaced.
    pub fn start_process(&mut self, top: &BlockRef, receiver: ReceiverRef, is_thread_safe: bool) -> ProcessId {
        if let Some(index) = self.index_of_script(top) {
            if is_thread_safe && self.entries[index].is_running() {
                return self.entries[index].id;
            }
            self.discard_entry(index);
        }
        self.stage.highlight(top);
        let id = self.allocate_id();
        let process = Process::new(id, top, receiver, &self.config);
        debug!(target: "blockrt::rt", process = id.get(), script = %top.selector, "start");
        self.push_entry(process);
        id
    }

    /// Stops the script if it is running, starts it otherwise.
    pub fn toggle_process(&mut self, top: &BlockRef, receiver: ReceiverRef) -> Option<ProcessId> {
        match self.index_of_script(top) {
            Some(index) if self.entries[index].is_running() => {
                self.stop_entry(index);
                None
            }
            _ => Some(self.start_process(top, receiver, false)),
        }
    }

    /// Marks the script's process, errored or not, for termination.
    ///
    /// The process unwinds during its own next burst and is dropped by the
    /// sweep that follows.
    pub fn stop_process(&mut self, top: &BlockRef) {
        if let Some(index) = self.index_of_script(top) {
            self.stop_entry(index);
        }
    }

    /// Marks every process for termination, like [`ThreadManager::stop_process`].
    pub fn stop_all(&mut self) {
        debug!(target: "blockrt::rt", processes = self.entries.len(), "stop all");
        for index in 0..self.entries.len() {
            self.stop_entry(index);
        }
    }

    /// Runs one burst of every process whose receiver is not picked up, then
    /// drops the processes that finished.
    ///
    /// Processes started during the step first run on the next step. With
    /// error catching disabled the first evaluation error is returned.
    pub fn step(&mut self) -> Result<()> {
        let ids: Vec<ProcessId> = self.entries.iter().map(|entry| entry.id).collect();
        for id in ids {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            let runnable = self.entries[index]
                .process
                .as_ref()
                .is_some_and(|process| process.context().is_some() && !process.receiver().is_picked_up());
            if !runnable {
                continue;
            }
            let Some(mut process) = self.entries[index].process.take() else {
                continue;
            };
            let result = process.run_step(self);
            if let Some(index) = self.index_of(id) {
                let entry = &mut self.entries[index];
                if std::mem::take(&mut entry.stop_requested) {
                    process.stop();
                }
                entry.process = Some(process);
            }
            result?;
        }
        self.remove_terminated_processes();
        Ok(())
    }

    /// Drops finished processes. Errored processes stay registered so their
    /// script keeps its error marker until it is stopped or restarted.
    pub fn remove_terminated_processes(&mut self) {
        let stage = self.stage.clone();
        self.entries.retain_mut(|entry| {
            let Some(process) = entry.process.as_mut() else {
                return true;
            };
            if process.is_running() || process.error_flag() {
                return true;
            }
            process.unwind();
            stage.unhighlight(&entry.top_block);
            if entry.top_block.kind.is_reporter() {
                if let Some(value) = process.result() {
                    stage.show_result(&entry.top_block, value);
                }
            }
            trace!(target: "blockrt::rt", process = entry.id.get(), frames = process.frame_count(), "removed");
            false
        });
    }

    pub fn is_running(&self, id: ProcessId) -> bool {
        self.index_of(id).is_some_and(|index| self.entries[index].is_running())
    }

    /// Id of the process registered for the script at `top`.
    pub fn find_process(&self, top: &BlockRef) -> Option<ProcessId> {
        self.index_of_script(top).map(|index| self.entries[index].id)
    }

    /// The registered process, unless it is currently running its step.
    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.index_of(id).and_then(|index| self.entries[index].process.as_ref())
    }

    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no registered process is still running.
    pub fn is_idle(&self) -> bool {
        !self.entries.iter().any(Entry::is_running)
    }

    pub fn last_answer(&self) -> &Val {
        &self.last_answer
    }

    pub(super) fn set_last_answer(&mut self, answer: Val) {
        self.last_answer = answer;
    }

    pub(super) fn has_active_prompter(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.process.as_ref().is_some_and(Process::has_prompter))
    }

    pub(super) fn allocate_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Registers a process created by a running one.
    pub(super) fn add_process(&mut self, process: Process) {
        self.push_entry(process);
    }

    /// Consumes a stop requested for `id` while it was running.
    pub(super) fn take_stop_request(&mut self, id: ProcessId) -> bool {
        match self.index_of(id) {
            Some(index) => std::mem::take(&mut self.entries[index].stop_requested),
            None => false,
        }
    }

    fn push_entry(&mut self, process: Process) {
        self.entries.push(Entry {
            id: process.id(),
            top_block: process.top_block().clone(),
            stop_requested: false,
            process: Some(process),
        });
    }

    fn stop_entry(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        trace!(target: "blockrt::rt", process = entry.id.get(), "stop");
        match entry.process.as_mut() {
            Some(process) => process.stop(),
            None => entry.stop_requested = true,
        }
    }

    /// Replaces the entry when its script restarts: drops it at once, unless
    /// its process is the one currently stepping; that one is dropped by the
    /// sweep after its burst.
    fn discard_entry(&mut self, index: usize) {
        self.stop_entry(index);
        if self.entries[index].process.is_none() {
            return;
        }
        let entry = self.entries.remove(index);
        if let Some(mut process) = entry.process {
            process.unwind();
        }
        self.stage.unhighlight(&entry.top_block);
    }

    fn index_of(&self, id: ProcessId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn index_of_script(&self, top: &BlockRef) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| Rc::ptr_eq(&entry.top_block, top) && !entry.stop_requested)
    }
}

impl fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadManager")
            .field("processes", &self.process_ids())
            .field("config", &self.config)
            .finish()
    }
}
