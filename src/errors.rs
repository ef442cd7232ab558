//! Error types for the Git-Internal crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, index handling, caching, and streaming. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, encoding/decoding, network/auth,
//!   and custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Internal library.
///
/// - Used across object parsing, pack encode/decode, index, caching and streams.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed or unsupported blob object encoding.
    #[error("The `{0}` is not a valid git blob object.")]
    InvalidBlobObject(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object.")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("The `{0}` is not a valid git tree item.")]
    InvalidTreeItem(String),

    /// Tree contains no entries.
    #[error("`{0}`.")]
    EmptyTreeItems(String),

    /// Invalid commit signature type.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignatureType(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Commit parse or validation failed.
    #[error("Invalid Commit: {0}")]
    InvalidCommit(String),

    /// Malformed tag object.
    #[error("Not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed or unsupported index (.idx) file.
    #[error("The `{0}` is not a valid idx file.")]
    InvalidIdxFile(String),

    /// Malformed or unsupported pack file.
    #[error("The `{0}` is not a valid pack file.")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("The `{0}` is not a valid pack header.")]
    InvalidPackHeader(String),

    /// Malformed or unsupported git index file.
    #[error("The `{0}` is not a valid index file.")]
    InvalidIndexFile(String),

    /// Invalid git index header.
    #[error("The `{0}` is not a valid index header.")]
    InvalidIndexHeader(String),

    /// Invalid CLI or function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Invalid SHA1 hash formatting or value.
    #[error("The {0} is not a valid Hash value ")]
    InvalidHashValue(String),

    /// Delta object reconstruction error.
    #[error("Delta Object Error Info:{0}")]
    DeltaObjectError(String),

    /// Object not fully populated for packing.
    #[error("The object to be packed is incomplete ,{0}")]
    UnCompletedPackObject(String),

    /// Invalid decoded object info.
    #[error("Error decode in the Object ,info:{0}")]
    InvalidObjectInfo(String),

    /// Hash not found in current file context.
    #[error("Cannot find Hash value: {0} from current file")]
    NotFoundHashValue(String),

    /// Failed to encode object to bytes.
    #[error("Can't encode the object which id [{0}] to bytes")]
    EncodeObjectError(String),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    ConversionError(String),

    /// Invalid path when locating parent tree.
    #[error("Can't find parent tree by path: {0}")]
    InvalidPathError(String),

    /// Failed to encode pack entries.
    #[error("Can't encode entries to pack: {0}")]
    PackEncodeError(String),

    /// Object missing from caches or storage.
    #[error("Can't find specific object: {0}")]
    ObjectNotFound(String),

    /// Repository not found.
    #[error("Repository not found")]
    RepoNotFound,

    /// Unauthorized access.
    #[error("UnAuthorized: {0}")]
    UnAuthorized(String),

    /// Network communication error.
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),

    /// Hex/hash string does not have the width expected for the repository's hash algorithm.
    #[error("Format error: {0}")]
    FormatError(String),

    /// Pkt-line frame is malformed (bad length prefix or truncated payload).
    #[error("Malformed pkt-line: {0}")]
    MalformedPktLine(String),

    /// Pkt-line payload exceeds the 65516-byte wire limit.
    #[error("Pkt-line payload of {0} bytes exceeds the 65516-byte limit")]
    PktLineTooLong(usize),

    /// A ref name could not be resolved.
    #[error("Ref not found: {0}")]
    RefNotFound(String),

    /// A symbolic ref chain exceeded the resolution depth bound.
    #[error("Ref chain too deep resolving: {0}")]
    RefChainTooDeep(String),

    /// Deleting or overwriting a ref that HEAD currently points at.
    #[error("Ref is checked out: {0}")]
    RefIsCheckedOut(String),

    /// A ref's compare-and-set update lost a race against a concurrent writer.
    #[error("Ref update is stale, prior value changed: {0}")]
    RefUpdateStale(String),

    /// Creating a branch that already exists without the force flag.
    #[error("Branch already exists: {0}")]
    BranchExists(String),

    /// Branch name did not resolve to an existing ref.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// A short hash prefix matched more than one object.
    #[error("Ambiguous short hash `{0}` matches multiple objects")]
    AmbiguousShortHash(String),

    /// Attempted to mix hash widths within a single repository.
    #[error("Hash algorithm mismatch: {0}")]
    HashAlgorithmMismatch(String),

    /// A delta chain did not resolve within the fixed iteration cap.
    #[error("Delta chain unresolvable after the iteration cap: {0}")]
    DeltaChainUnresolvable(String),

    /// A history or merge-base walk rejected a non-fast-forward update without force.
    #[error("Update is not a fast-forward: {0}")]
    NonFastForward(String),

    /// Working tree or index has uncommitted changes blocking the requested operation.
    #[error("Uncommitted changes present: {0}")]
    UncommittedChanges(String),

    /// `continue_merge`/`abort_merge` invoked with no merge in progress.
    #[error("No merge in progress")]
    NoMergeInProgress,

    /// Attempted to finalize a merge while conflicts remain unresolved.
    #[error("Unresolved conflicts remain: {0}")]
    UnresolvedConflicts(String),

    /// A long-running operation observed its cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// A loose or packed object's canonical bytes failed the `<type> <size>\0` header check.
    #[error("Malformed object: {0}")]
    MalformedObject(String),

    /// Packfile bytes failed header, checksum, or entry-count validation.
    #[error("Malformed packfile: {0}")]
    MalformedPackfile(String),

    /// A delta instruction stream referenced an out-of-range copy or carried a bad opcode.
    #[error("Malformed delta: {0}")]
    MalformedDelta(String),

    /// The remote rejected the request due to a cross-origin policy.
    #[error("Request blocked by CORS policy: {0}")]
    CORSBlocked(String),

    /// The remote requires authentication that was not supplied.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// The remote rejected valid credentials as insufficient for the requested operation.
    #[error("Access forbidden: {0}")]
    AccessForbidden(String),

    /// The remote returned a 5xx response.
    #[error("Server error: {0}")]
    ServerError(String),

    /// The remote returned a response that does not match the expected protocol shape.
    #[error("Invalid response from remote: {0}")]
    InvalidResponse(String),

    /// A network request exceeded its deadline.
    #[error("Network operation timed out: {0}")]
    NetworkTimeout(String),
}
