//! Per-runtime binding options.

/// Numbering of the first element seen by scripts in array access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexBase {
    /// `obj[0]` is the first element.
    Zero,
    /// `obj[1]` is the first element, like Lua sequences.
    #[default]
    One,
}

impl IndexBase {
    pub fn offset(&self) -> i64 {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }

    /// Convert a script index into the zero-based index host hooks receive.
    pub fn to_host(&self, script_index: i64) -> i64 {
        script_index.saturating_sub(self.offset())
    }

    /// Convert a zero-based host index into a script index.
    pub fn to_script(&self, host_index: i64) -> i64 {
        host_index.saturating_add(self.offset())
    }
}

/// Options that shape dispatch behaviour for one Lua runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    /// Array numbering at the script surface.
    pub index_base: IndexBase,
    /// Raise `UnknownKey` instead of returning `nil` when a string key
    /// misses every member table and the ad-hoc table.
    pub strict_keys: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            index_base: IndexBase::One,
            strict_keys: false,
        }
    }
}

impl BindOptions {
    pub fn with_index_base(mut self, index_base: IndexBase) -> Self {
        self.index_base = index_base;
        self
    }

    pub fn with_strict_keys(mut self, strict_keys: bool) -> Self {
        self.strict_keys = strict_keys;
        self
    }
}
