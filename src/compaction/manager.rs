//! Compaction scheduling for one bucket.

use crate::compaction::executor::CompactExecutor;
use crate::compaction::picker::{CompactionPicker, CompactionTask};
use crate::compaction::rewriter::CompactRewriter;
use crate::data::DataFileMeta;
use crate::error::{Error, Result};
use crate::mergetree::Levels;
use crossbeam::channel::{Receiver, TryRecvError};
use std::sync::Arc;

/// Files replaced and produced by one compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactResult {
    /// Input files, no longer live once the result is applied
    pub before: Vec<DataFileMeta>,
    /// Output files
    pub after: Vec<DataFileMeta>,
}

enum Pending {
    Done(Result<CompactResult>),
    Running(Receiver<Result<CompactResult>>),
}

/// Decides when a bucket compacts and runs at most one compaction at a time,
/// either inline or on a shared [`CompactExecutor`].
pub struct CompactManager {
    picker: CompactionPicker,
    rewriter: Arc<CompactRewriter>,
    executor: Option<Arc<CompactExecutor>>,
    pending: Option<Pending>,
}

impl CompactManager {
    /// Create a manager. Without an executor compactions run inline.
    pub fn new(
        picker: CompactionPicker,
        rewriter: CompactRewriter,
        executor: Option<Arc<CompactExecutor>>,
    ) -> Self {
        Self { picker, rewriter: Arc::new(rewriter), executor, pending: None }
    }

    /// Returns true while a submitted compaction has not been collected.
    pub fn is_compacting(&self) -> bool {
        self.pending.is_some()
    }

    /// Pick and start a compaction if one is due.
    ///
    /// `full` merges every file into the last level. Returns false when
    /// nothing was started, either because nothing is due or because a
    /// previous compaction has not been collected yet.
    pub fn submit_compaction(&mut self, levels: &Levels, full: bool) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }

        let task = if full { self.picker.pick_full(levels) } else { self.picker.pick(levels) };
        let task = match task {
            Some(task) => task,
            None => return Ok(false),
        };

        if task.is_trivial_move() {
            log::debug!(
                "Moving {} from level {} to level {}",
                task.inputs[0].file_name,
                task.level,
                task.output_level
            );
            let after = task.inputs.iter().map(|f| f.upgrade(task.output_level)).collect();
            self.pending = Some(Pending::Done(Ok(CompactResult { before: task.inputs, after })));
            return Ok(true);
        }

        self.pending = Some(match &self.executor {
            Some(executor) => {
                let rewriter = self.rewriter.clone();
                Pending::Running(executor.submit(move || run(&rewriter, task))?)
            }
            None => Pending::Done(run(&self.rewriter, task)),
        });
        Ok(true)
    }

    /// Collect the result of the submitted compaction.
    ///
    /// Returns `Ok(None)` if nothing was submitted, or if `blocking` is false
    /// and the compaction is still running. A failed compaction is reported
    /// once; its inputs stay live.
    pub fn get_compaction_result(&mut self, blocking: bool) -> Result<Option<CompactResult>> {
        match self.pending.take() {
            None => Ok(None),
            Some(Pending::Done(result)) => result.map(Some),
            Some(Pending::Running(rx)) => {
                if blocking {
                    return rx.recv().map_err(|_| worker_lost())?.map(Some);
                }
                match rx.try_recv() {
                    Ok(result) => result.map(Some),
                    Err(TryRecvError::Empty) => {
                        self.pending = Some(Pending::Running(rx));
                        Ok(None)
                    }
                    Err(TryRecvError::Disconnected) => Err(worker_lost()),
                }
            }
        }
    }
}

fn run(rewriter: &CompactRewriter, task: CompactionTask) -> Result<CompactResult> {
    let after = rewriter.rewrite(&task)?;
    Ok(CompactResult { before: task.all_inputs(), after })
}

fn worker_lost() -> Error {
    Error::CompactionFailed(Box::new(Error::internal("Compaction worker stopped unexpectedly")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergeEngine, Options};
    use crate::data::{DataFilePathFactory, DataFileWriterFactory, FileWriter};
    use crate::fs::LocalFileIO;
    use crate::mergetree::MergeFunction;
    use crate::types::{KeyValue, Row, RowKind, Value};
    use tempfile::TempDir;

    fn options() -> Options {
        Options::default().num_levels(3).level0_compaction_trigger(2)
    }

    fn factory(dir: &TempDir) -> DataFileWriterFactory {
        DataFileWriterFactory::new(
            Arc::new(LocalFileIO::new()),
            Arc::new(DataFilePathFactory::new(dir.path(), "", 0)),
            &options(),
        )
    }

    fn manager(
        factory: &DataFileWriterFactory,
        executor: Option<Arc<CompactExecutor>>,
    ) -> CompactManager {
        let function = MergeFunction::from_engine(&MergeEngine::Deduplicate);
        CompactManager::new(
            CompactionPicker::new(&options()),
            CompactRewriter::new(factory.clone(), function),
            executor,
        )
    }

    fn level0_files(factory: &DataFileWriterFactory, n: u64) -> Vec<DataFileMeta> {
        (0..n)
            .map(|i| {
                let mut writer = factory.create_writer(0).unwrap();
                for k in 0..10u64 {
                    writer
                        .write(&KeyValue::new(
                            format!("key{:03}", k),
                            i * 10 + k + 1,
                            RowKind::Insert,
                            Row::new(vec![Value::Int(i as i64)]),
                        ))
                        .unwrap();
                }
                writer.close().unwrap();
                writer.result().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_inline_compaction() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let mut manager = manager(&factory, None);
        let mut levels = Levels::new(level0_files(&factory, 3), 3).unwrap();

        assert!(manager.submit_compaction(&levels, false).unwrap());
        assert!(manager.is_compacting());
        // only one compaction at a time
        assert!(!manager.submit_compaction(&levels, false).unwrap());

        let result = manager.get_compaction_result(false).unwrap().unwrap();
        assert_eq!(result.before.len(), 3);
        assert_eq!(result.after.len(), 1);
        assert_eq!(result.after[0].row_count, 10);
        assert!(!manager.is_compacting());

        levels.update(&result.before, &result.after).unwrap();
        assert!(levels.level0().is_empty());
        assert!(!manager.submit_compaction(&levels, false).unwrap());
    }

    #[test]
    fn test_async_compaction() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let executor = Arc::new(CompactExecutor::new(1).unwrap());
        let mut manager = manager(&factory, Some(executor));
        let levels = Levels::new(level0_files(&factory, 3), 3).unwrap();

        assert!(manager.submit_compaction(&levels, false).unwrap());
        let result = manager.get_compaction_result(true).unwrap().unwrap();
        assert_eq!(result.after.len(), 1);
        assert!(manager.get_compaction_result(true).unwrap().is_none());
    }

    #[test]
    fn test_nothing_to_compact() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let mut manager = manager(&factory, None);
        let levels = Levels::new(level0_files(&factory, 1), 3).unwrap();

        assert!(!manager.submit_compaction(&levels, false).unwrap());
        assert!(manager.get_compaction_result(true).unwrap().is_none());
    }

    #[test]
    fn test_full_compaction_upgrades_single_file() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let mut manager = manager(&factory, None);
        let levels = Levels::new(level0_files(&factory, 1), 3).unwrap();

        assert!(manager.submit_compaction(&levels, true).unwrap());
        let result = manager.get_compaction_result(true).unwrap().unwrap();
        assert_eq!(result.before[0].file_name, result.after[0].file_name);
        assert_eq!(result.after[0].level, 2);
    }
}
