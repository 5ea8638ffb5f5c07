//! Level structure of a bucket.
//!
//! Level 0 holds freshly flushed files whose key ranges may overlap; each of
//! them is a sorted run on its own. Every higher level holds exactly one
//! sorted run of pairwise non-overlapping files.

use crate::data::DataFileMeta;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Files of one level whose key ranges do not overlap, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedRun {
    files: Vec<DataFileMeta>,
}

impl SortedRun {
    /// A run without files
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sort `files` by key and check that no two of them overlap.
    pub fn from_unsorted(mut files: Vec<DataFileMeta>) -> Result<Self> {
        files.sort_by(|a, b| a.min_key.cmp(&b.min_key));
        for pair in files.windows(2) {
            if pair[0].max_key >= pair[1].min_key {
                return Err(Error::corruption(format!(
                    "Files {} and {} of one sorted run overlap",
                    pair[0].file_name, pair[1].file_name
                )));
            }
        }
        Ok(Self { files })
    }

    /// Files in key order
    pub fn files(&self) -> &[DataFileMeta] {
        &self.files
    }

    /// Returns true if the run holds no file
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size of the run in bytes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum()
    }
}

/// Files of one bucket organized by level.
#[derive(Debug, Clone)]
pub struct Levels {
    /// Level-0 files, newest first
    level0: Vec<DataFileMeta>,
    /// Runs of levels 1..num_levels
    levels: Vec<SortedRun>,
}

impl Levels {
    /// Build the structure from the live files of a bucket.
    pub fn new(files: Vec<DataFileMeta>, num_levels: usize) -> Result<Self> {
        if num_levels < 2 {
            return Err(Error::invalid_argument("A merge tree needs at least two levels"));
        }
        let mut levels =
            Self { level0: Vec::new(), levels: vec![SortedRun::empty(); num_levels - 1] };
        levels.update(&[], &files)?;
        Ok(levels)
    }

    /// Number of levels, level 0 included
    pub fn number_of_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Highest level a file can be placed in
    pub fn max_level(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Level-0 files, newest first
    pub fn level0(&self) -> &[DataFileMeta] {
        &self.level0
    }

    /// The run of a level >= 1
    pub fn run_of_level(&self, level: u32) -> &SortedRun {
        &self.levels[level as usize - 1]
    }

    /// Total size of a level in bytes
    pub fn total_size(&self, level: u32) -> u64 {
        if level == 0 {
            self.level0.iter().map(|f| f.file_size).sum()
        } else {
            self.run_of_level(level).total_size()
        }
    }

    /// Register a freshly flushed file.
    pub fn add_level0_file(&mut self, file: DataFileMeta) {
        self.level0.push(file);
        self.sort_level0();
    }

    /// The highest level holding any file, if any.
    pub fn non_empty_highest_level(&self) -> Option<u32> {
        for (i, run) in self.levels.iter().enumerate().rev() {
            if !run.is_empty() {
                return Some(i as u32 + 1);
            }
        }
        if self.level0.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// Every live file of the bucket
    pub fn all_files(&self) -> Vec<DataFileMeta> {
        self.level0.iter().chain(self.levels.iter().flat_map(|r| r.files.iter())).cloned().collect()
    }

    /// Replace `before` with `after`, as produced by a compaction.
    ///
    /// On error the structure is left unchanged.
    pub fn update(&mut self, before: &[DataFileMeta], after: &[DataFileMeta]) -> Result<()> {
        let mut next = self.clone();
        next.apply(before, after)?;
        *self = next;
        Ok(())
    }

    fn apply(&mut self, before: &[DataFileMeta], after: &[DataFileMeta]) -> Result<()> {
        let max_level = self.max_level();
        if let Some(bad) = after.iter().find(|f| f.level > max_level) {
            return Err(Error::invalid_argument(format!(
                "File {} is at level {} but the tree has {} levels",
                bad.file_name,
                bad.level,
                self.number_of_levels()
            )));
        }

        let removed: HashSet<(u32, &str)> =
            before.iter().map(|f| (f.level, f.file_name.as_str())).collect();

        let old0 = self.level0.len();
        self.level0.retain(|f| !removed.contains(&(0, f.file_name.as_str())));
        let mut found = old0 - self.level0.len();

        for (i, run) in self.levels.iter_mut().enumerate() {
            let level = i as u32 + 1;
            let added: Vec<_> = after.iter().filter(|f| f.level == level).cloned().collect();
            let touched = before.iter().any(|f| f.level == level);
            if !touched && added.is_empty() {
                continue;
            }

            let mut files: Vec<_> = run
                .files
                .iter()
                .filter(|f| !removed.contains(&(level, f.file_name.as_str())))
                .cloned()
                .collect();
            found += run.files.len() - files.len();
            files.extend(added);
            *run = SortedRun::from_unsorted(files)?;
        }

        if found != removed.len() {
            return Err(Error::invalid_state(format!(
                "Only {} of {} files to remove are part of the level structure",
                found,
                removed.len()
            )));
        }

        self.level0.extend(after.iter().filter(|f| f.level == 0).cloned());
        self.sort_level0();
        Ok(())
    }

    fn sort_level0(&mut self) {
        self.level0.sort_by(|a, b| {
            b.max_sequence.cmp(&a.max_sequence).then_with(|| a.file_name.cmp(&b.file_name))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::test_util::meta;

    fn seq(mut file: DataFileMeta, max_sequence: u64) -> DataFileMeta {
        file.max_sequence = max_sequence;
        file
    }

    #[test]
    fn test_sorted_run_rejects_overlap() {
        let ok = SortedRun::from_unsorted(vec![
            meta("b", 1, b"k", b"z", 1),
            meta("a", 1, b"a", b"f", 1),
        ])
        .unwrap();
        assert_eq!(ok.files()[0].file_name, "a");

        let bad = SortedRun::from_unsorted(vec![
            meta("a", 1, b"a", b"m", 1),
            meta("b", 1, b"k", b"z", 1),
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_levels_restore_and_runs() {
        let levels = Levels::new(
            vec![
                seq(meta("l0-old", 0, b"a", b"z", 10), 5),
                seq(meta("l0-new", 0, b"a", b"z", 10), 9),
                meta("l1-a", 1, b"a", b"f", 10),
                meta("l1-b", 1, b"g", b"m", 10),
                meta("l3", 3, b"a", b"z", 100),
            ],
            5,
        )
        .unwrap();

        assert_eq!(levels.level0()[0].file_name, "l0-new");
        assert_eq!(levels.level0().len(), 2);
        assert_eq!(levels.non_empty_highest_level(), Some(3));
        assert_eq!(levels.total_size(1), 20);
        assert_eq!(levels.run_of_level(1).files().len(), 2);
        assert!(levels.run_of_level(2).is_empty());
        assert_eq!(levels.all_files().len(), 5);
    }

    #[test]
    fn test_levels_update() {
        let inputs = vec![
            meta("a", 0, b"a", b"c", 1),
            meta("b", 0, b"b", b"d", 1),
            meta("c", 1, b"a", b"b", 1),
        ];
        let mut levels = Levels::new(inputs.clone(), 3).unwrap();

        levels.update(&inputs, &[meta("d", 1, b"a", b"d", 3)]).unwrap();

        assert!(levels.level0().is_empty());
        assert_eq!(levels.run_of_level(1).files().len(), 1);
        assert_eq!(levels.run_of_level(1).files()[0].file_name, "d");
    }

    #[test]
    fn test_levels_upgrade_moves_file() {
        let mut levels = Levels::new(vec![meta("a", 0, b"a", b"c", 1)], 3).unwrap();
        let file = levels.level0()[0].clone();
        levels.update(&[file.clone()], &[file.upgrade(2)]).unwrap();

        assert!(levels.level0().is_empty());
        assert_eq!(levels.non_empty_highest_level(), Some(2));
    }

    #[test]
    fn test_levels_update_unknown_file() {
        let mut levels = Levels::new(vec![meta("a", 0, b"a", b"c", 1)], 3).unwrap();
        assert!(levels.update(&[meta("zz", 1, b"a", b"c", 1)], &[]).is_err());
    }

    #[test]
    fn test_levels_rejects_level_out_of_range() {
        assert!(Levels::new(vec![meta("a", 7, b"a", b"c", 1)], 3).is_err());
    }
}
