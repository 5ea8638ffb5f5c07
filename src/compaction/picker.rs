//! Compaction file picker.
//!
//! This module selects which files should be compacted based on the
//! Leveled Compaction strategy:
//!
//! - Level 0: compacted into level 1 once it holds more files than
//!   `level0_compaction_trigger`.
//! - Level N >= 1: compacted into level N+1 once its size exceeds its target
//!   (`level1_target_size * size_ratio^(N-1)`). The level with the highest
//!   size/target score goes first.

use crate::config::Options;
use crate::data::DataFileMeta;
use crate::mergetree::Levels;

/// A compaction task selected by the picker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionTask {
    /// Source level
    pub level: u32,
    /// Target level
    pub output_level: u32,
    /// Files picked from the source levels
    pub inputs: Vec<DataFileMeta>,
    /// Files of the output level whose key range overlaps the inputs
    pub overlapping: Vec<DataFileMeta>,
    /// Whether tombstones can be dropped from the output
    pub drop_delete: bool,
}

impl CompactionTask {
    /// Every file the task reads and replaces
    pub fn all_inputs(&self) -> Vec<DataFileMeta> {
        self.inputs.iter().chain(self.overlapping.iter()).cloned().collect()
    }

    /// A single file with nothing to merge against can be moved to the
    /// output level without rewriting it.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs.len() == 1 && self.overlapping.is_empty() && self.level != self.output_level
    }

    /// Total bytes read by the task
    pub fn input_size(&self) -> u64 {
        self.inputs.iter().chain(self.overlapping.iter()).map(|f| f.file_size).sum()
    }
}

/// Picker for selecting files to compact
#[derive(Debug, Clone)]
pub struct CompactionPicker {
    level0_trigger: usize,
    target_sizes: Vec<u64>,
}

impl CompactionPicker {
    /// Create a picker from the table options
    pub fn new(options: &Options) -> Self {
        Self {
            level0_trigger: options.level0_compaction_trigger,
            target_sizes: (0..options.num_levels)
                .map(|l| options.target_size_for_level(l))
                .collect(),
        }
    }

    /// Pick files for compaction
    ///
    /// Returns None if no compaction is needed
    pub fn pick(&self, levels: &Levels) -> Option<CompactionTask> {
        // Level 0 goes first: every extra level-0 file slows down reads
        if levels.level0().len() > self.level0_trigger {
            return self.pick_level0(levels);
        }

        let mut best: Option<(u32, f64)> = None;
        for level in 1..levels.max_level() {
            let size = levels.total_size(level);
            let target = self.target_size(level);
            if size <= target {
                continue;
            }
            let score = size as f64 / target as f64;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((level, score));
            }
        }

        best.map(|(level, _)| self.pick_level(levels, level))
    }

    /// Merge every file of the bucket into the highest level.
    pub fn pick_full(&self, levels: &Levels) -> Option<CompactionTask> {
        let output_level = levels.max_level();
        let files = levels.all_files();
        // nothing below the last level means nothing to merge into it
        if files.iter().all(|f| f.level == output_level) {
            return None;
        }

        let (overlapping, inputs): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| f.level == output_level);
        let level = inputs.iter().map(|f| f.level).min().unwrap_or(output_level);

        log::info!(
            "Picking full compaction: {} files into level {}",
            inputs.len() + overlapping.len(),
            output_level
        );
        Some(CompactionTask { level, output_level, inputs, overlapping, drop_delete: true })
    }

    fn target_size(&self, level: u32) -> u64 {
        self.target_sizes.get(level as usize).copied().unwrap_or(u64::MAX).max(1)
    }

    /// Level 0 files may overlap, so all of them are compacted into level 1
    fn pick_level0(&self, levels: &Levels) -> Option<CompactionTask> {
        let inputs = levels.level0().to_vec();
        let min = inputs.iter().map(|f| f.min_key.as_slice()).min()?;
        let max = inputs.iter().map(|f| f.max_key.as_slice()).max()?;
        let overlapping = overlapping_files(levels, 1, min, max);

        log::info!(
            "Picking Level 0 compaction: {} files at Level 0, {} overlapping at Level 1",
            inputs.len(),
            overlapping.len()
        );

        Some(self.task(levels, 0, 1, inputs, overlapping))
    }

    /// Files of a level >= 1 don't overlap, so a contiguous window of them is
    /// picked: the one that relieves the excess at the lowest cost in bytes
    /// rewritten.
    fn pick_level(&self, levels: &Levels, level: u32) -> CompactionTask {
        let files = levels.run_of_level(level).files();
        let excess = levels.total_size(level).saturating_sub(self.target_size(level)).max(1);

        let mut best: Option<(usize, usize, u64)> = None;
        for start in 0..files.len() {
            let mut window_size = 0;
            for end in start..files.len() {
                window_size += files[end].file_size;
                if window_size < excess {
                    continue;
                }
                let overlap: u64 = overlapping_files(
                    levels,
                    level + 1,
                    &files[start].min_key,
                    &files[end].max_key,
                )
                .iter()
                .map(|f| f.file_size)
                .sum();
                let cost = window_size + overlap;
                if best.map_or(true, |(_, _, c)| cost < c) {
                    best = Some((start, end, cost));
                }
                break;
            }
        }

        let (start, end) = best.map_or((0, files.len().saturating_sub(1)), |(s, e, _)| (s, e));
        let inputs = files[start..=end].to_vec();
        let overlapping =
            overlapping_files(levels, level + 1, &files[start].min_key, &files[end].max_key);

        log::info!(
            "Picking Level {} compaction: {} of {} files, {} overlapping at Level {}",
            level,
            inputs.len(),
            files.len(),
            overlapping.len(),
            level + 1
        );

        self.task(levels, level, level + 1, inputs, overlapping)
    }

    fn task(
        &self,
        levels: &Levels,
        level: u32,
        output_level: u32,
        inputs: Vec<DataFileMeta>,
        overlapping: Vec<DataFileMeta>,
    ) -> CompactionTask {
        // tombstones can only go once nothing older lives below the output
        let drop_delete = output_level >= levels.non_empty_highest_level().unwrap_or(0);
        CompactionTask { level, output_level, inputs, overlapping, drop_delete }
    }
}

fn overlapping_files(levels: &Levels, level: u32, min: &[u8], max: &[u8]) -> Vec<DataFileMeta> {
    if level > levels.max_level() {
        return Vec::new();
    }
    levels
        .run_of_level(level)
        .files()
        .iter()
        .filter(|f| f.overlaps_range(min, max))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::test_util::meta;

    fn options() -> Options {
        Options::default().num_levels(4).level0_compaction_trigger(2).level1_target_size(100)
    }

    #[test]
    fn test_no_compaction_needed() {
        let levels = Levels::new(
            vec![meta("a", 0, b"a", b"c", 10), meta("b", 0, b"b", b"d", 10)],
            4,
        )
        .unwrap();
        assert!(CompactionPicker::new(&options()).pick(&levels).is_none());
    }

    #[test]
    fn test_pick_level0_compaction() {
        let levels = Levels::new(
            vec![
                meta("a", 0, b"c", b"e", 10),
                meta("b", 0, b"d", b"f", 10),
                meta("c", 0, b"e", b"g", 10),
                meta("x", 1, b"a", b"b", 10),
                meta("y", 1, b"f", b"h", 10),
            ],
            4,
        )
        .unwrap();

        let task = CompactionPicker::new(&options()).pick(&levels).unwrap();
        assert_eq!(task.level, 0);
        assert_eq!(task.output_level, 1);
        assert_eq!(task.inputs.len(), 3);
        assert_eq!(task.overlapping.len(), 1);
        assert_eq!(task.overlapping[0].file_name, "y");
        assert!(task.drop_delete);
        assert!(!task.is_trivial_move());
    }

    #[test]
    fn test_level0_keeps_tombstones_above_data() {
        let levels = Levels::new(
            vec![
                meta("a", 0, b"a", b"b", 10),
                meta("b", 0, b"a", b"b", 10),
                meta("c", 0, b"a", b"b", 10),
                meta("deep", 3, b"a", b"z", 10),
            ],
            4,
        )
        .unwrap();

        let task = CompactionPicker::new(&options()).pick(&levels).unwrap();
        assert_eq!(task.output_level, 1);
        assert!(!task.drop_delete);
    }

    #[test]
    fn test_pick_level_window() {
        // level 1 target is 100; 160 bytes means an excess of 60
        let levels = Levels::new(
            vec![
                meta("l1-a", 1, b"a", b"b", 40),
                meta("l1-b", 1, b"c", b"d", 40),
                meta("l1-c", 1, b"e", b"f", 40),
                meta("l1-d", 1, b"g", b"h", 40),
                meta("l2-big", 2, b"a", b"d", 500),
                meta("l2-small", 2, b"e", b"h", 5),
            ],
            4,
        )
        .unwrap();

        let task = CompactionPicker::new(&options()).pick(&levels).unwrap();
        assert_eq!(task.level, 1);
        assert_eq!(task.output_level, 2);
        let names: Vec<_> = task.inputs.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["l1-c", "l1-d"]);
        assert_eq!(task.overlapping.len(), 1);
        assert_eq!(task.overlapping[0].file_name, "l2-small");
    }

    #[test]
    fn test_trivial_move() {
        let levels = Levels::new(vec![meta("big", 1, b"a", b"z", 500)], 4).unwrap();
        let task = CompactionPicker::new(&options()).pick(&levels).unwrap();
        assert_eq!(task.output_level, 2);
        assert!(task.is_trivial_move());
    }

    #[test]
    fn test_pick_full() {
        let picker = CompactionPicker::new(&options());
        let levels = Levels::new(
            vec![
                meta("a", 0, b"a", b"c", 10),
                meta("b", 1, b"a", b"c", 10),
                meta("c", 3, b"a", b"z", 10),
            ],
            4,
        )
        .unwrap();

        let task = picker.pick_full(&levels).unwrap();
        assert_eq!(task.output_level, 3);
        assert_eq!(task.inputs.len(), 2);
        assert_eq!(task.overlapping.len(), 1);
        assert!(task.drop_delete);

        let settled = Levels::new(vec![meta("c", 3, b"a", b"z", 10)], 4).unwrap();
        assert!(picker.pick_full(&settled).is_none());
        assert!(picker.pick_full(&Levels::new(vec![], 4).unwrap()).is_none());
    }
}
