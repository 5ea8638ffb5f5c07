//! Executes a compaction task.

use crate::compaction::merge::{open_file, RecordIter, SortMergeReader};
use crate::compaction::picker::CompactionTask;
use crate::data::{DataFileMeta, DataFileWriterFactory, FileWriter};
use crate::error::{Error, Result};
use crate::mergetree::MergeFunction;
use std::time::Instant;

/// Merges the input files of a task into new files at the output level.
#[derive(Debug, Clone)]
pub struct CompactRewriter {
    writer_factory: DataFileWriterFactory,
    merge_function: MergeFunction,
}

impl CompactRewriter {
    /// Create a rewriter for one bucket
    pub fn new(writer_factory: DataFileWriterFactory, merge_function: MergeFunction) -> Self {
        Self { writer_factory, merge_function }
    }

    /// Execute the compaction
    ///
    /// This will:
    /// 1. Open every input file as a sorted record stream
    /// 2. Merge them, resolving each key through the merge function
    /// 3. Write the result into rolling files at the output level
    ///
    /// On failure every output file written so far is deleted and the inputs
    /// stay untouched.
    pub fn rewrite(&self, task: &CompactionTask) -> Result<Vec<DataFileMeta>> {
        let start = Instant::now();
        log::info!(
            "Starting compaction: {} input files ({} bytes) -> level {}",
            task.inputs.len() + task.overlapping.len(),
            task.input_size(),
            task.output_level
        );

        let mut writer = self.writer_factory.create_rolling_writer(task.output_level);
        let result = self.open_sources(task).and_then(|sources| {
            let reader =
                SortMergeReader::new(sources, self.merge_function.clone(), task.drop_delete)?;
            for kv in reader {
                writer.write(&kv?)?;
            }
            writer.close()?;
            writer.result()
        });

        match result {
            Ok(files) => {
                log::info!(
                    "Compaction completed: {} records in {} files at level {}, took {:?}",
                    writer.record_count(),
                    files.len(),
                    task.output_level,
                    start.elapsed()
                );
                Ok(files)
            }
            Err(e) => {
                log::error!("Compaction into level {} failed: {}", task.output_level, e);
                writer.abort();
                Err(Error::CompactionFailed(Box::new(e)))
            }
        }
    }

    fn open_sources(&self, task: &CompactionTask) -> Result<Vec<RecordIter>> {
        let file_io = self.writer_factory.file_io();
        task.inputs
            .iter()
            .chain(task.overlapping.iter())
            .map(|file| open_file(file_io.as_ref(), &self.writer_factory.to_path(file)))
            .collect()
    }
}
