// Copyright 2026 gridtier Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::thread::JoinHandle;

use gridtier_common::{
    entry::{GridEntry, TypeCode, Uid},
    layout::EntryLayout,
};

use crate::{driver::StorePosition, error::Result};

/// Unit of background work submitted to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct PrefetchWorker {
    rx: flume::Receiver<Job>,
}

impl PrefetchWorker {
    fn run(self) {
        while let Ok(job) = self.rx.recv() {
            job();
        }
    }
}

/// Pool of threads that load and decode stored entries ahead of their consumers.
#[derive(Debug)]
pub struct PrefetchPool {
    tx: Option<flume::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl PrefetchPool {
    /// Spawn `threads` workers.
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = flume::unbounded::<Job>();
        let handles = (0..threads.max(1))
            .map(|_| {
                let rx = rx.clone();
                std::thread::spawn(move || PrefetchWorker { rx }.run())
            })
            .collect();
        Self { tx: Some(tx), handles }
    }

    /// Run `job` on a pool thread.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = self.tx.as_ref() {
            // Workers only quit after the sender side is dropped, so the send cannot fail here.
            let _ = tx.send(Box::new(job));
        }
    }

    /// Worker thread count.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for PrefetchPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Entry decoded by a pool worker.
#[derive(Debug)]
pub struct LoadedLayout {
    /// Entry uid.
    pub uid: Uid,
    /// Entry type.
    pub type_code: TypeCode,
    /// Where the driver keeps the value, if it told us.
    pub position: Option<StorePosition>,
    /// Decoded layout.
    pub layout: EntryLayout,
}

impl LoadedLayout {
    /// Rebuild the full entry snapshot.
    pub fn into_entry(self) -> Result<GridEntry> {
        Ok(self.layout.into_entry(self.uid, self.type_code)?)
    }
}

/// Iterator over entries streaming out of the pool.
///
/// Ends when the producing workers finish and drop their senders.
#[derive(Debug)]
pub struct LoadedEntryIter {
    rx: flume::Receiver<Result<LoadedLayout>>,
}

impl LoadedEntryIter {
    pub(crate) fn new(rx: flume::Receiver<Result<LoadedLayout>>) -> Self {
        Self { rx }
    }
}

impl Iterator for LoadedEntryIter {
    type Item = Result<LoadedLayout>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
