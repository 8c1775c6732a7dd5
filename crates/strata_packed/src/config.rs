//! Sequence configuration.

use crate::error::{PackedError, PackedResult};
use serde::Serialize;
use strata_codec::{Varint248, VarintCodec};

/// Fan-in parameters of a summary index.
///
/// Both values must be powers of two and at least 2. The geometry is not
/// stored in the page, so a sequence must be reopened with the geometry it
/// was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TreeGeometry {
    values_per_branch: usize,
    branching_factor: usize,
}

impl TreeGeometry {
    /// Fan-in used when nothing else is configured.
    pub const DEFAULT: Self = Self {
        values_per_branch: 32,
        branching_factor: 32,
    };

    /// Creates a geometry after validating both fan-ins.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::InvalidGeometry`] if either value is not a
    /// power of two or is smaller than 2.
    pub fn new(values_per_branch: usize, branching_factor: usize) -> PackedResult<Self> {
        for (name, value) in [
            ("values_per_branch", values_per_branch),
            ("branching_factor", branching_factor),
        ] {
            if value < 2 || !value.is_power_of_two() {
                return Err(PackedError::invalid_geometry(format!(
                    "{name} must be a power of two >= 2, got {value}"
                )));
            }
        }

        Ok(Self {
            values_per_branch,
            branching_factor,
        })
    }

    /// Number of leaf values summarised by one leaf-level index entry.
    #[must_use]
    pub const fn values_per_branch(&self) -> usize {
        self.values_per_branch
    }

    /// Number of child entries summarised by one internal index entry.
    #[must_use]
    pub const fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    pub(crate) const fn vpb_mask(&self) -> usize {
        self.values_per_branch - 1
    }

    pub(crate) const fn bf_mask(&self) -> usize {
        self.branching_factor - 1
    }

    pub(crate) const fn vpb_log2(&self) -> u32 {
        self.values_per_branch.trailing_zeros()
    }

    pub(crate) const fn bf_log2(&self) -> u32 {
        self.branching_factor.trailing_zeros()
    }

    /// Leaf group that contains value `idx`.
    #[inline]
    pub(crate) const fn group_of(&self, idx: usize) -> usize {
        idx >> self.vpb_log2()
    }

    /// First value of leaf group `group`.
    #[inline]
    pub(crate) const fn group_start(&self, group: usize) -> usize {
        group << self.vpb_log2()
    }
}

impl Default for TreeGeometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for creating packed sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Index fan-in.
    pub geometry: TreeGeometry,

    /// Value capacity reserved when a sequence is created.
    pub initial_capacity: usize,

    /// Bytes a variable-length column keeps in reserve for re-encoding growth.
    pub safety_margin: usize,

    /// Number of elements re-encoded per window in `update_values`.
    pub update_window: usize,

    /// Reserved encoded bytes per variable-length column, safety margin
    /// included. `None` leaves columns bounded only by the page.
    pub max_data_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geometry: TreeGeometry::DEFAULT,
            initial_capacity: 0,
            safety_margin: <Varint248 as VarintCodec>::MAX_LEN,
            update_window: 32,
            max_data_size: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the index fan-in.
    #[must_use]
    pub const fn geometry(mut self, geometry: TreeGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Sets the initial value capacity.
    #[must_use]
    pub const fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the re-encoding safety margin in bytes.
    #[must_use]
    pub const fn safety_margin(mut self, bytes: usize) -> Self {
        self.safety_margin = bytes;
        self
    }

    /// Sets the `update_values` window length.
    #[must_use]
    pub const fn update_window(mut self, elements: usize) -> Self {
        self.update_window = if elements == 0 { 1 } else { elements };
        self
    }

    /// Sets the reserved byte budget of each new variable-length column.
    #[must_use]
    pub const fn max_data_size(mut self, bytes: usize) -> Self {
        self.max_data_size = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.geometry, TreeGeometry::DEFAULT);
        assert_eq!(config.initial_capacity, 0);
        assert_eq!(config.safety_margin, 9);
        assert_eq!(config.update_window, 32);
        assert_eq!(config.max_data_size, None);
    }

    #[test]
    fn builder_pattern() {
        let geometry = TreeGeometry::new(4, 8).unwrap();
        let config = Config::new()
            .geometry(geometry)
            .initial_capacity(100)
            .update_window(0)
            .max_data_size(512);

        assert_eq!(config.geometry.values_per_branch(), 4);
        assert_eq!(config.geometry.branching_factor(), 8);
        assert_eq!(config.initial_capacity, 100);
        assert_eq!(config.update_window, 1);
        assert_eq!(config.max_data_size, Some(512));
    }

    #[test]
    fn geometry_rejects_non_powers_of_two() {
        assert!(TreeGeometry::new(3, 4).is_err());
        assert!(TreeGeometry::new(4, 1).is_err());
        assert!(TreeGeometry::new(0, 0).is_err());
        assert!(TreeGeometry::new(2, 2).is_ok());
    }

    #[test]
    fn geometry_group_math() {
        let g = TreeGeometry::new(4, 4).unwrap();
        assert_eq!(g.vpb_log2(), 2);
        assert_eq!(g.group_of(7), 1);
        assert_eq!(g.group_start(2), 8);
        assert_eq!(g.vpb_mask(), 3);
    }
}
