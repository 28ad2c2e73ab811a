//! Thread and process tracking: maps OS tids/pids to sequential unique IDs
//! (utid/upid) and keeps per-thread names.
//!
//! utid/upid values are stable for the lifetime of an import, so every
//! consumer (samples, mappings) refers to the same thread row regardless of
//! the order records arrive in.

use std::collections::HashMap;

use crate::storage::StringId;

pub type Utid = u32;
pub type Upid = u32;

/// Sources of thread names, in increasing priority. A lower-priority source
/// never overwrites a name set by a higher-priority one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadNamePriority {
    Other,
    Ftrace,
    ProcessTree,
}

#[derive(Debug)]
pub struct Thread {
    pub tid: u32,
    pub upid: Upid,
    pub name: Option<StringId>,
    name_priority: ThreadNamePriority,
}

#[derive(Debug)]
pub struct Process {
    pub pid: u32,
}

#[derive(Default)]
pub struct ProcessTracker {
    threads: Vec<Thread>,
    processes: Vec<Process>,
    tid_to_utid: HashMap<u32, Utid>,
    pid_to_upid: HashMap<u32, Upid>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create_upid(&mut self, pid: u32) -> Upid {
        if let Some(&upid) = self.pid_to_upid.get(&pid) {
            return upid;
        }
        let upid = self.processes.len() as Upid;
        self.processes.push(Process { pid });
        self.pid_to_upid.insert(pid, upid);
        upid
    }

    /// Associates `tid` with process `pid`, creating thread and process rows
    /// as needed, and returns the thread's utid.
    pub fn update_thread(&mut self, tid: u32, pid: u32) -> Utid {
        let upid = self.get_or_create_upid(pid);
        if let Some(&utid) = self.tid_to_utid.get(&tid) {
            self.threads[utid as usize].upid = upid;
            return utid;
        }
        let utid = self.threads.len() as Utid;
        self.threads.push(Thread {
            tid,
            upid,
            name: None,
            name_priority: ThreadNamePriority::Other,
        });
        self.tid_to_utid.insert(tid, utid);
        utid
    }

    /// Sets the thread name unless a higher-priority source already named it.
    /// Unknown tids are ignored.
    pub fn update_thread_name(&mut self, tid: u32, name: StringId, priority: ThreadNamePriority) {
        let Some(&utid) = self.tid_to_utid.get(&tid) else {
            return;
        };
        let thread = &mut self.threads[utid as usize];
        if thread.name.is_some() && priority < thread.name_priority {
            return;
        }
        thread.name = Some(name);
        thread.name_priority = priority;
    }

    pub fn utid_for_tid(&self, tid: u32) -> Option<Utid> {
        self.tid_to_utid.get(&tid).copied()
    }

    pub fn upid_for_utid(&self, utid: Utid) -> Option<Upid> {
        self.threads.get(utid as usize).map(|t| t.upid)
    }

    pub fn thread(&self, utid: Utid) -> &Thread {
        &self.threads[utid as usize]
    }

    pub fn process(&self, upid: Upid) -> &Process {
        &self.processes[upid as usize]
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}
