//! Object key layout for job artifacts.

use std::fmt;

/// A single artifact of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Frame(usize),
    Landmarks(usize),
    Mask(usize),
    Avatar,
    Manifest,
}

/// Builds keys under `jobs/{job_id}/`.
#[derive(Debug, Clone)]
pub struct ArtifactKeys {
    root: String,
}

impl ArtifactKeys {
    pub fn new(job_id: impl fmt::Display) -> Self {
        Self {
            root: format!("jobs/{}", job_id),
        }
    }

    /// Prefix shared by every artifact of the job, with trailing slash.
    pub fn prefix(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn frame(&self, index: usize) -> String {
        format!("{}/frames/frame_{:04}.raw", self.root, index)
    }

    pub fn landmarks(&self, index: usize) -> String {
        format!("{}/landmarks/{:04}.json", self.root, index)
    }

    pub fn mask(&self, index: usize) -> String {
        format!("{}/masks/mask_{:04}.raw", self.root, index)
    }

    pub fn avatar(&self) -> String {
        format!("{}/avatar.mp4", self.root)
    }

    pub fn manifest(&self) -> String {
        format!("{}/manifest.json", self.root)
    }

    pub fn key_for(&self, kind: ArtifactKind) -> String {
        match kind {
            ArtifactKind::Frame(i) => self.frame(i),
            ArtifactKind::Landmarks(i) => self.landmarks(i),
            ArtifactKind::Mask(i) => self.mask(i),
            ArtifactKind::Avatar => self.avatar(),
            ArtifactKind::Manifest => self.manifest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let keys = ArtifactKeys::new("job-1");
        assert_eq!(keys.frame(7), "jobs/job-1/frames/frame_0007.raw");
        assert_eq!(keys.landmarks(12), "jobs/job-1/landmarks/0012.json");
        assert_eq!(keys.mask(0), "jobs/job-1/masks/mask_0000.raw");
        assert_eq!(keys.avatar(), "jobs/job-1/avatar.mp4");
        assert_eq!(keys.manifest(), "jobs/job-1/manifest.json");
        assert_eq!(keys.prefix(), "jobs/job-1/");
    }

    #[test]
    fn test_wide_indices_not_truncated() {
        let keys = ArtifactKeys::new("j");
        assert_eq!(keys.frame(12345), "jobs/j/frames/frame_12345.raw");
    }

    #[test]
    fn test_frame_keys_sort_by_index() {
        let keys = ArtifactKeys::new("j");
        let mut all: Vec<String> = (0..20).rev().map(|i| keys.frame(i)).collect();
        all.sort();
        assert_eq!(all.first().unwrap(), &keys.frame(0));
        assert_eq!(all.last().unwrap(), &keys.frame(19));
    }
}
