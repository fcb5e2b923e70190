/// Setup and host-side errors.
///
/// These are the "negative status" failures of the runtime: they are
/// reported to the caller as values and never raise signals. WebAssembly
/// traps travel through the non-local-jump channel instead and surface as
/// [`crate::Trap`] codes out of the trampoline.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The OS refused to hand out pages.
    #[error("out of memory: the operating system refused the mapping")]
    OutOfMemory,
    /// A base pointer was not found in the executable-code registry.
    #[error("unknown code block")]
    UnknownCodeBlock,
    /// Changing page permissions failed; the arena stays tracked but
    /// must not be executed.
    #[error("failed to change page protections")]
    ProtectFailed,
    /// The bytes to install do not fit the arena they were staged for.
    #[error("code does not fit its arena")]
    CodeTooLarge,
    /// An index was outside the configured entity space.
    #[error("index out of bounds")]
    IndexOutOfBounds,
    /// The operation requires owned storage but the context only borrows it.
    #[error("storage is borrowed, not owned")]
    StorageBorrowed,
    /// The GC heap or type cache has not been registered.
    #[error("gc state not configured")]
    GcNotConfigured,
    /// The flat type-cache array was malformed or contained an
    /// unterminated supertype chain.
    #[error("invalid gc type cache")]
    InvalidTypeCache,
    /// WASI state was missing or a preopen/stdio handle could not be
    /// opened.
    #[error("wasi setup failed")]
    WasiSetup,
}
