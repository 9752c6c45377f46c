//! Style (gait) annotation of a clip.
//!
//! Each channel carries a boolean flag per frame that is held constant between
//! style keys; the continuous value eases between neighbouring flags over a
//! transition window centred on every key.

use serde::{Deserialize, Serialize};

use crate::error::{MotionError, Result};
use crate::math;

/// One style channel over a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleChannel {
    pub name: String,
    pub flags: Vec<bool>,
    pub values: Vec<f64>,
}

impl StyleChannel {
    fn new(name: &str, frames: usize) -> Self {
        Self {
            name: name.to_string(),
            flags: vec![false; frames],
            values: vec![0.0; frames],
        }
    }
}

/// Style weights per channel and frame, edited through style keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFunction {
    frame_time: f64,
    transition: f64,
    keys: Vec<bool>,
    channels: Vec<StyleChannel>,
}

impl StyleFunction {
    pub fn new(names: &[String], frames: usize, frame_time: f64, transition: f64) -> Self {
        Self {
            frame_time,
            transition: transition.max(0.0),
            keys: vec![false; frames],
            channels: names.iter().map(|n| StyleChannel::new(n, frames)).collect(),
        }
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.keys.len()
    }

    pub fn channels(&self) -> &[StyleChannel] {
        &self.channels
    }

    pub fn keys(&self) -> &[bool] {
        &self.keys
    }

    pub fn transition(&self) -> f64 {
        self.transition
    }

    pub fn add_channel(&mut self, name: &str) {
        self.channels.push(StyleChannel::new(name, self.keys.len()));
    }

    pub fn remove_channel(&mut self) -> Option<StyleChannel> {
        self.channels.pop()
    }

    /// Style weights of every channel at `frame` (zero past the clip end).
    pub fn values_at(&self, frame: usize) -> Vec<f64> {
        self.channels
            .iter()
            .map(|c| c.values.get(frame).copied().unwrap_or(0.0))
            .collect()
    }

    fn check(&self, frame: usize, channel: Option<usize>) -> Result<()> {
        if frame >= self.keys.len() {
            return Err(MotionError::FrameOutOfRange {
                frame,
                frames: self.keys.len(),
            });
        }
        if let Some(c) = channel {
            if c >= self.channels.len() {
                return Err(MotionError::invalid_input(format!(
                    "style channel {c} does not exist"
                )));
            }
        }
        Ok(())
    }

    pub fn flag(&self, frame: usize, channel: usize) -> Result<bool> {
        self.check(frame, Some(channel))?;
        Ok(self.channels[channel].flags[frame])
    }

    pub fn set_flag(&mut self, frame: usize, channel: usize, value: bool) -> Result<()> {
        if self.flag(frame, channel)? == value {
            return Ok(());
        }
        self.channels[channel].flags[frame] = value;
        self.interpolate(frame, channel);
        Ok(())
    }

    pub fn is_key(&self, frame: usize) -> bool {
        self.keys.get(frame).copied().unwrap_or(false)
    }

    pub fn set_key(&mut self, frame: usize, value: bool) -> Result<()> {
        self.check(frame, None)?;
        if self.keys[frame] == value {
            return Ok(());
        }
        self.keys[frame] = value;
        self.refresh();
        Ok(())
    }

    pub fn set_transition(&mut self, value: f64) {
        let value = value.max(0.0);
        if self.transition != value {
            self.transition = value;
            self.refresh();
        }
    }

    pub fn previous_key(&self, frame: usize) -> Option<usize> {
        math::previous_key(&self.keys, frame)
    }

    pub fn next_key(&self, frame: usize) -> Option<usize> {
        math::next_key(&self.keys, frame)
    }

    /// Transition window at `frame`: bounded by the neighbouring keys.
    pub fn window(&self, frame: usize) -> f64 {
        let now = frame as f64 * self.frame_time;
        let prev = self.previous_key(frame).map_or(0.0, |k| k as f64 * self.frame_time);
        let next = self.next_key(frame).map_or(self.duration(), |k| k as f64 * self.frame_time);
        (now - prev).abs().min((now - next).abs()).min(self.transition)
    }

    fn duration(&self) -> f64 {
        self.keys.len().saturating_sub(1) as f64 * self.frame_time
    }

    fn frame_at(&self, time: f64) -> usize {
        let last = self.keys.len().saturating_sub(1);
        ((time.clamp(0.0, self.duration()) / self.frame_time).round() as usize).min(last)
    }

    fn refresh(&mut self) {
        for frame in 0..self.keys.len() {
            if self.keys[frame] {
                for channel in 0..self.channels.len() {
                    self.interpolate(frame, channel);
                }
            }
        }
    }

    fn interpolate(&mut self, frame: usize, channel: usize) {
        let prev = self.previous_key(frame);
        let next = self.next_key(frame);
        let c = &mut self.channels[channel];
        c.values[frame] = if c.flags[frame] { 1.0 } else { 0.0 };
        if self.keys[frame] {
            self.make_constant(channel, prev, Some(frame));
            self.make_constant(channel, Some(frame), next);
        } else {
            self.make_constant(channel, prev, next);
        }
        self.make_transition(channel, prev);
        self.make_transition(channel, Some(frame));
        self.make_transition(channel, next);
    }

    /// Hold the flag of `previous` (or frame 0) up to the frame before `next`.
    fn make_constant(&mut self, channel: usize, previous: Option<usize>, next: Option<usize>) {
        let start = previous.unwrap_or(0);
        let end = next.unwrap_or(self.keys.len());
        let c = &mut self.channels[channel];
        let flag = c.flags[start];
        for i in start + 1..end {
            c.flags[i] = flag;
            c.values[i] = if flag { 1.0 } else { 0.0 };
        }
    }

    /// Ease the values across the window around `frame` with squared weights.
    fn make_transition(&mut self, channel: usize, frame: Option<usize>) {
        let Some(frame) = frame else {
            return;
        };
        let window = self.window(frame);
        let now = frame as f64 * self.frame_time;
        let a = self.frame_at(now - 0.5 * window);
        let b = self.frame_at(now + 0.5 * window);
        if b < a + 2 {
            return;
        }
        let dist = (b - a) as f64;
        let c = &mut self.channels[channel];
        let value_a = if c.flags[a] { 1.0 } else { 0.0 };
        let value_b = if c.flags[b] { 1.0 } else { 0.0 };
        for i in a + 1..b {
            let rate_a = ((i - a) as f64 / dist).powi(2);
            let rate_b = ((b - i) as f64 / dist).powi(2);
            c.values[i] = rate_b / (rate_a + rate_b) * value_a + rate_a / (rate_a + rate_b) * value_b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_then_run() -> StyleFunction {
        let names = vec!["Walk".to_string(), "Run".to_string()];
        let mut styles = StyleFunction::new(&names, 101, 0.01, 0.2);
        styles.set_key(0, true).unwrap();
        styles.set_flag(0, 0, true).unwrap();
        styles.set_key(50, true).unwrap();
        styles.set_flag(50, 1, true).unwrap();
        styles.set_flag(50, 0, false).unwrap();
        styles
    }

    #[test]
    fn test_flags_hold_between_keys() {
        let styles = walk_then_run();
        assert!(styles.flag(20, 0).unwrap());
        assert!(!styles.flag(20, 1).unwrap());
        assert!(styles.flag(80, 1).unwrap());
        assert!(!styles.flag(80, 0).unwrap());
    }

    #[test]
    fn test_transition_is_smooth_and_bounded() {
        let styles = walk_then_run();
        let walk = &styles.channels()[0].values;
        assert_eq!(walk[10], 1.0);
        assert_eq!(walk[90], 0.0);
        for i in 41..60 {
            assert!(walk[i] >= 0.0 && walk[i] <= 1.0);
            assert!(walk[i + 1] <= walk[i] + 1e-12);
        }
        assert!(walk[45] > 0.5 && walk[55] < 0.5);
    }

    #[test]
    fn test_key_navigation() {
        let styles = walk_then_run();
        assert_eq!(styles.previous_key(30), Some(0));
        assert_eq!(styles.next_key(30), Some(50));
        assert_eq!(styles.next_key(50), None);
        assert!((styles.window(50) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_frame_is_rejected() {
        let mut styles = walk_then_run();
        assert!(styles.set_key(500, true).is_err());
        assert!(styles.set_flag(10, 5, true).is_err());
    }
}
