//! Configuration knobs for background decompression and path resolution.
//!
//! [`Config`] is deliberately small: it covers exactly the five knobs listed
//! in the external-interfaces section of the resource manager's contract.
//! Values are clamped at construction time rather than validated, mirroring
//! how the pool sizing and chunking options are handled in the
//! decompression worker pool.

/// Resource manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    background_decompression: bool,
    chunk_size: usize,
    read_ahead: usize,
    pool_size: usize,
    resource_path_prefix: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            background_decompression: false,
            chunk_size: 8192,
            read_ahead: 2,
            pool_size: 0,
            resource_path_prefix: None,
        }
    }
}

impl Config {
    /// Starts a new builder seeded with the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }

    /// Master enable for background (streaming) decompression.
    pub fn background_decompression(&self) -> bool {
        self.background_decompression && self.pool_size > 0
    }

    /// Bytes read per chunk in streaming mode. Always ≥ 1.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunks of read-ahead per load in streaming mode. Always ≥ 1.
    pub fn read_ahead(&self) -> usize {
        self.read_ahead
    }

    /// Maximum decompression worker threads. `0` means background
    /// decompression is disabled regardless of `background_decompression`.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Override for the host filesystem prefix applied to relative paths.
    pub fn resource_path_prefix(&self) -> Option<&str> {
        self.resource_path_prefix.as_deref()
    }
}

/// Fluent builder for [`Config`], clamping each knob the way the resource
/// manager's own `set_background_params` clamps at reconfiguration time.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    /// Enables or disables background decompression.
    pub fn background_decompression(mut self, enabled: bool) -> Self {
        self.0.background_decompression = enabled;
        self
    }

    /// Sets the per-chunk read size in streaming mode, clamped to ≥ 1.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.0.chunk_size = size.max(1);
        self
    }

    /// Sets the read-ahead depth in streaming mode, clamped to ≥ 1.
    pub fn read_ahead(mut self, chunks: usize) -> Self {
        self.0.read_ahead = chunks.max(1);
        self
    }

    /// Sets the decompression worker pool size. `0` disables background
    /// decompression entirely, independent of the `background_decompression`
    /// flag.
    pub fn pool_size(mut self, workers: usize) -> Self {
        self.0.pool_size = workers;
        self
    }

    /// Overrides the host filesystem prefix used for relative paths.
    pub fn resource_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.0.resource_path_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_background_decompression() {
        let c = Config::default();
        assert!(!c.background_decompression());
        assert_eq!(c.pool_size(), 0);
    }

    #[test]
    fn pool_size_zero_disables_even_if_flag_set() {
        let c = Config::builder()
            .background_decompression(true)
            .pool_size(0)
            .build();
        assert!(!c.background_decompression());
    }

    #[test]
    fn chunk_size_and_read_ahead_clamp_to_one() {
        let c = Config::builder().chunk_size(0).read_ahead(0).build();
        assert_eq!(c.chunk_size(), 1);
        assert_eq!(c.read_ahead(), 1);
    }

    #[test]
    fn background_decompression_enabled_with_positive_pool() {
        let c = Config::builder()
            .background_decompression(true)
            .pool_size(4)
            .build();
        assert!(c.background_decompression());
        assert_eq!(c.pool_size(), 4);
    }

    #[test]
    fn empty_resource_path_prefix_is_none() {
        let c = Config::builder().resource_path_prefix("").build();
        assert_eq!(c.resource_path_prefix(), None);
    }
}
