use thiserror::Error;

#[derive(Error, Debug)]
pub enum XeError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DRM Driver Error: {0}")]
    Driver(String),

    #[error("Operation timed out")]
    WaitTimeout,

    #[error("no engine of class {0} reported by the device")]
    EngineNotFound(u16),

    #[error("misaligned bind: va {va:#x} / range {range:#x} must be multiples of page size {page_size:#x}")]
    MisalignedBinding { va: u64, range: u64, page_size: u64 },

    #[error("bind at va {va:#x} range {range:#x} overlaps an active binding")]
    OverlappingBinding { va: u64, range: u64 },

    #[error("no active binding at va {va:#x} range {range:#x}")]
    UnknownBinding { va: u64, range: u64 },

    #[error("no connected display output with at least one mode")]
    NoOutput,

    #[error("no usable CRTC for the selected connector")]
    NoCrtc,
}

// A convenient alias
pub type XeResult<T> = Result<T, XeError>;
