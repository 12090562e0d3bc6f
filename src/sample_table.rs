//! MP4 sample table resolution.
//!
//! The `stbl` children describe samples indirectly:
//! - stts: decode durations, run-length encoded
//! - ctts: composition offsets (reordered codecs only)
//! - stss: sync samples; absent means every sample is a keyframe
//! - stsc: sample-to-chunk runs
//! - stsz: sample sizes, uniform or per sample
//! - stco/co64: chunk offsets
//!
//! [`SampleTableBuilder`] collects the raw entries and flattens them into one
//! [`SampleLocation`] per sample, in decode order. The declared sample count
//! is checked against the file length and the chunk layout before anything
//! is sized from it.

use std::collections::HashSet;

use crate::error::FrameError;

/// Where a sample lives and when it decodes and displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleLocation {
    pub(crate) offset: u64,
    pub(crate) size: u32,
    pub(crate) decode_timestamp: i64,
    pub(crate) composition_offset: i32,
    pub(crate) duration: u32,
    pub(crate) is_keyframe: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SampleTableBuilder {
    /// (sample_count, delta)
    stts: Vec<(u32, u32)>,
    /// 1-based sync sample numbers.
    sync_samples: Option<Vec<u32>>,
    /// (first_chunk, samples_per_chunk)
    stsc: Vec<(u32, u32)>,
    uniform_size: u32,
    stsz_count: u32,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    /// (sample_count, offset)
    ctts: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts = entries;
    }

    pub(crate) fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    pub(crate) fn set_stsc(&mut self, entries: Vec<(u32, u32)>) {
        self.stsc = entries;
    }

    pub(crate) fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.stsz_count = sample_count;
        self.sizes = sizes;
    }

    pub(crate) fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub(crate) fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts = entries;
    }

    /// Total samples declared by `stsz`.
    pub(crate) fn sample_count(&self) -> u32 {
        self.stsz_count
    }

    /// Resolve the first `limit` samples (all of them when `None`) of a
    /// track stored in a file of `file_len` bytes.
    pub(crate) fn build(
        &self,
        limit: Option<usize>,
        file_len: u64,
    ) -> Result<Vec<SampleLocation>, FrameError> {
        self.check_declared_count(file_len)?;

        let total = self.stsz_count as usize;
        let count = limit.map_or(total, |k| k.min(total));
        if count == 0 {
            return Ok(Vec::new());
        }

        let addressable = self.chunk_capacity();
        if count as u64 > addressable {
            return Err(FrameError::InvalidContainer(format!(
                "{count} samples requested but the chunk layout addresses only {addressable}"
            )));
        }

        let chunks = self.resolve_chunks(count);
        let last_delta = self.stts.last().map_or(1, |&(_, delta)| delta);
        let durations = expand_runs(&self.stts, count, last_delta);
        let composition = expand_runs(&self.ctts, count, 0);
        let sync: Option<HashSet<u32>> = self
            .sync_samples
            .as_ref()
            .map(|s| s.iter().copied().collect());

        let mut locations = Vec::with_capacity(count);
        let mut within_chunk = 0u64;
        let mut previous_chunk = None;
        let mut dts = 0i64;

        for i in 0..count {
            let chunk = chunks[i];
            if previous_chunk != Some(chunk) {
                within_chunk = 0;
                previous_chunk = Some(chunk);
            }
            let size = self.sample_size(i);
            // A chunk without an offset entry resolves past the end of any
            // buffer and is rejected by the demuxer.
            let base = self.chunk_offsets.get(chunk).copied().unwrap_or(u64::MAX);

            locations.push(SampleLocation {
                offset: base.saturating_add(within_chunk),
                size,
                decode_timestamp: dts,
                composition_offset: composition[i],
                duration: durations[i],
                is_keyframe: sync
                    .as_ref()
                    .is_none_or(|set| set.contains(&(i as u32 + 1))),
            });

            within_chunk += size as u64;
            dts += durations[i] as i64;
        }

        Ok(locations)
    }

    /// `stsz` must not promise more sample bytes than the file holds.
    fn check_declared_count(&self, file_len: u64) -> Result<(), FrameError> {
        let declared = self.stsz_count as u64;
        if self.uniform_size > 0 {
            let bytes = declared.saturating_mul(self.uniform_size as u64);
            if bytes > file_len {
                return Err(FrameError::InvalidContainer(format!(
                    "stsz declares {declared} samples of {} bytes, more than the {file_len}-byte file holds",
                    self.uniform_size
                )));
            }
        } else if (self.sizes.len() as u64) < declared {
            return Err(FrameError::InvalidContainer(format!(
                "stsz declares {declared} samples but lists {} sizes",
                self.sizes.len()
            )));
        }
        Ok(())
    }

    /// Samples reachable through `stsc` runs over the known chunks.
    fn chunk_capacity(&self) -> u64 {
        let chunk_end = self.chunk_offsets.len() as u64 + 1;
        self.stsc
            .iter()
            .enumerate()
            .map(|(i, &(first_chunk, per_chunk))| {
                let next_first = self
                    .stsc
                    .get(i + 1)
                    .map_or(chunk_end, |&(next, _)| next as u64)
                    .min(chunk_end);
                next_first
                    .saturating_sub(first_chunk.max(1) as u64)
                    .saturating_mul(per_chunk as u64)
            })
            .fold(0, u64::saturating_add)
    }

    fn sample_size(&self, index: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sizes.get(index).copied().unwrap_or(0)
        }
    }

    /// Zero-based chunk index of each of the first `count` samples. The
    /// caller has checked `count` against [`Self::chunk_capacity`].
    fn resolve_chunks(&self, count: usize) -> Vec<usize> {
        let chunk_end = self.chunk_offsets.len() as u64 + 1;
        let mut result = Vec::with_capacity(count);

        'runs: for (i, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let next_first = self
                .stsc
                .get(i + 1)
                .map_or(chunk_end, |&(next, _)| next as u64)
                .min(chunk_end);
            for chunk in first_chunk.max(1) as u64..next_first {
                for _ in 0..per_chunk {
                    if result.len() == count {
                        break 'runs;
                    }
                    result.push((chunk - 1) as usize);
                }
            }
        }

        result
    }
}

/// Expand `(count, value)` runs to one value per sample, padding short
/// tables with `pad`.
fn expand_runs<T: Copy>(runs: &[(u32, T)], count: usize, pad: T) -> Vec<T> {
    let mut values = Vec::with_capacity(count);
    for &(run, value) in runs {
        for _ in 0..run {
            if values.len() == count {
                return values;
            }
            values.push(value);
        }
    }
    values.resize(count, pad);
    values
}
