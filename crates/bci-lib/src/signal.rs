use serde::{Deserialize, Serialize};

/// Multichannel recording: one sample vector per named channel, all sharing `fs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub fs: f64,
    pub channels: Vec<String>,
    /// `data[c][i]` is sample `i` of channel `c`.
    pub data: Vec<Vec<f64>>,
}

impl Recording {
    pub fn new(fs: f64, channels: Vec<String>) -> Self {
        let data = vec![Vec::new(); channels.len()];
        Self { fs, channels, data }
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.fs
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        let idx = self.channel_index(name)?;
        self.data.get(idx).map(Vec::as_slice)
    }

    /// Append `other` after the last sample. Both recordings must share the
    /// sampling rate and the channel list (same names, same order).
    pub fn append(&mut self, other: Recording) -> Result<(), String> {
        if (self.fs - other.fs).abs() > 1e-9 * self.fs.abs().max(1.0) {
            return Err(format!(
                "sampling rate {} Hz does not match {} Hz",
                other.fs, self.fs
            ));
        }
        if self.channels.len() != other.channels.len()
            || self
                .channels
                .iter()
                .zip(&other.channels)
                .any(|(a, b)| !a.eq_ignore_ascii_case(b))
        {
            return Err(format!(
                "channels [{}] do not match [{}]",
                other.channels.join(", "),
                self.channels.join(", ")
            ));
        }
        for (mine, theirs) in self.data.iter_mut().zip(other.data) {
            mine.extend(theirs);
        }
        Ok(())
    }

    /// Join recordings end to end, in the given order.
    pub fn concatenate(recordings: Vec<Recording>) -> Result<Option<Recording>, String> {
        let mut iter = recordings.into_iter();
        let Some(mut joined) = iter.next() else {
            return Ok(None);
        };
        for next in iter {
            joined.append(next)?;
        }
        Ok(Some(joined))
    }
}
