// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{collections::BTreeMap, fmt};

/// Per-frame sensor controls understood by the capture pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlId {
    /// Exposure time in microseconds
    ExposureTime,
    /// Analogue sensor gain
    AnalogueGain,
    /// Brightness adjustment, -1.0 to 1.0
    Brightness,
    /// Contrast, 1.0 is neutral
    Contrast,
    /// Red and blue colour gains
    ColourGains,
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlId::ExposureTime => "ExposureTime",
            ControlId::AnalogueGain => "AnalogueGain",
            ControlId::Brightness => "Brightness",
            ControlId::Contrast => "Contrast",
            ControlId::ColourGains => "ColourGains",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlValue {
    Int(i32),
    Float(f32),
    FloatPair([f32; 2]),
}

impl ControlValue {
    fn components(&self) -> Vec<f32> {
        match *self {
            ControlValue::Int(v) => vec![v as f32],
            ControlValue::Float(v) => vec![v],
            ControlValue::FloatPair(v) => v.to_vec(),
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Int(v) => write!(f, "{v}"),
            ControlValue::Float(v) => write!(f, "{v}"),
            ControlValue::FloatPair([a, b]) => write!(f, "[{a}, {b}]"),
        }
    }
}

/// Inclusive range a camera accepts for one control.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlRange {
    pub min: f32,
    pub max: f32,
}

impl ControlRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: &ControlValue) -> bool {
        value
            .components()
            .iter()
            .all(|v| (self.min..=self.max).contains(v))
    }
}

pub type ControlRanges = BTreeMap<ControlId, ControlRange>;

/// Control values to apply to a capture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlList {
    values: BTreeMap<ControlId, ControlValue>,
}

impl ControlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: ControlId, value: ControlValue) -> Self {
        self.set(id, value);
        self
    }

    pub fn set(&mut self, id: ControlId, value: ControlValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: ControlId) -> Option<ControlValue> {
        self.values.get(&id).copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ControlId, ControlValue)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }

    /// Drops every control the camera does not support or whose value falls
    /// outside the advertised range, returning what was dropped. The
    /// remaining controls are unaffected.
    pub fn retain_supported(&mut self, ranges: &ControlRanges) -> Vec<(ControlId, ControlValue)> {
        let mut rejected = Vec::new();
        self.values.retain(|id, value| {
            let ok = ranges.get(id).is_some_and(|range| range.contains(value));
            if !ok {
                rejected.push((*id, *value));
            }
            ok
        });
        rejected
    }
}

impl fmt::Display for ControlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (id, value) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{id}={value}")?;
            first = false;
        }
        Ok(())
    }
}
