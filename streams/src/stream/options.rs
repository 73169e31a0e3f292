/// Default buffer threshold for byte streams, in bytes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Default buffer threshold for object mode streams, in chunks.
pub const DEFAULT_OBJECT_HIGH_WATER_MARK: usize = 16;

/// Construction options shared by every stream variant.
///
/// ```rust,ignore
/// let options = Options::new()
///     .with_object_mode(true)
///     .with_high_water_mark(4);
/// let source = Readable::new(&tasks, options);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    high_water_mark: Option<usize>,
    object_mode: bool,
    allow_half_open: bool,
    auto_destroy: bool,
}

impl Options {
    /// Byte mode, default threshold, half-open duplexes, no auto destroy.
    pub const fn new() -> Self {
        Self {
            high_water_mark: None,
            object_mode: false,
            allow_half_open: true,
            auto_destroy: false,
        }
    }

    /// Buffer threshold at which writes report backpressure and producers are no longer
    /// asked for data. Measured in bytes, or in chunks for object mode.
    pub const fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// Counts every chunk as one unit instead of by its byte length.
    pub const fn with_object_mode(mut self, object_mode: bool) -> Self {
        self.object_mode = object_mode;
        self
    }

    /// When `false`, the two sides of a duplex end together.
    pub const fn with_allow_half_open(mut self, allow_half_open: bool) -> Self {
        self.allow_half_open = allow_half_open;
        self
    }

    /// Destroys the stream once every side has ended or finished.
    pub const fn with_auto_destroy(mut self, auto_destroy: bool) -> Self {
        self.auto_destroy = auto_destroy;
        self
    }

    pub const fn high_water_mark(&self) -> usize {
        match self.high_water_mark {
            Some(high_water_mark) => high_water_mark,
            None if self.object_mode => DEFAULT_OBJECT_HIGH_WATER_MARK,
            None => DEFAULT_HIGH_WATER_MARK,
        }
    }

    #[inline]
    pub const fn object_mode(&self) -> bool {
        self.object_mode
    }

    #[inline]
    pub const fn allow_half_open(&self) -> bool {
        self.allow_half_open
    }

    #[inline]
    pub const fn auto_destroy(&self) -> bool {
        self.auto_destroy
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_depends_on_mode() {
        assert_eq!(Options::new().high_water_mark(), DEFAULT_HIGH_WATER_MARK);
        assert_eq!(
            Options::new().with_object_mode(true).high_water_mark(),
            DEFAULT_OBJECT_HIGH_WATER_MARK
        );
    }

    #[test]
    fn explicit_threshold_wins() {
        let options = Options::new().with_object_mode(true).with_high_water_mark(2);

        assert_eq!(options.high_water_mark(), 2);
        assert!(options.object_mode());
    }

    #[test]
    fn defaults() {
        let options = Options::default();

        assert!(options.allow_half_open());
        assert!(!options.auto_destroy());
        assert!(!options.object_mode());
    }
}
