use http::StatusCode;
use thiserror::Error;

/// Base of the numeric error-code space used when a response error is
/// surfaced to callers; the HTTP status is added to it.
const ERROR_CODE_BASE: u32 = 54000;

/// Connection-layer error enumeration, aligned with the CURLcode values so
/// codes stay meaningful in logs and retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    UnsupportedProtocol = 1,
    FailedInit = 2,
    UrlMalformat = 3,
    NotBuiltIn = 4,
    CouldntResolveProxy = 5,
    CouldntResolveHost = 6,
    CouldntConnect = 7,
    WeirdServerReply = 8,
    RemoteAccessDenied = 9,
    FtpAcceptFailed = 10,
    FtpWeirdPassReply = 11,
    FtpAcceptTimeout = 12,
    FtpWeirdPasvReply = 13,
    FtpWeird227Format = 14,
    FtpCantGetHost = 15,
    Http2 = 16,
    FtpCouldntSetType = 17,
    PartialFile = 18,
    FtpCouldntRetrFile = 19,
    Obsolete20 = 20,
    QuoteError = 21,
    HttpReturnedError = 22,
    WriteError = 23,
    Obsolete24 = 24,
    UploadFailed = 25,
    ReadError = 26,
    OutOfMemory = 27,
    OperationTimedout = 28,
    Obsolete29 = 29,
    FtpPortFailed = 30,
    FtpCouldntUseRest = 31,
    Obsolete32 = 32,
    RangeError = 33,
    HttpPostError = 34,
    SslConnectError = 35,
    BadDownloadResume = 36,
    FileCouldntReadFile = 37,
    LdapCannotBind = 38,
    LdapSearchFailed = 39,
    Obsolete40 = 40,
    FunctionNotFound = 41,
    AbortedByCallback = 42,
    BadFunctionArgument = 43,
    Obsolete44 = 44,
    InterfaceFailed = 45,
    Obsolete46 = 46,
    TooManyRedirects = 47,
    UnknownOption = 48,
    SetoptOptionSyntax = 49,
    Obsolete50 = 50,
    Obsolete51 = 51,
    GotNothing = 52,
    SslEngineNotfound = 53,
    SslEngineSetfailed = 54,
    SendError = 55,
    RecvError = 56,
    Obsolete57 = 57,
    SslCertproblem = 58,
    SslCipher = 59,
    PeerFailedVerification = 60,
    BadContentEncoding = 61,
    Obsolete62 = 62,
    FilesizeExceeded = 63,
    UseSslFailed = 64,
    SendFailRewind = 65,
    SslEngineInitfailed = 66,
    LoginDenied = 67,
    TftpNotfound = 68,
    TftpPerm = 69,
    RemoteDiskFull = 70,
    TftpIllegal = 71,
    TftpUnknownid = 72,
    RemoteFileExists = 73,
    TftpNosuchuser = 74,
    Obsolete75 = 75,
    Obsolete76 = 76,
    SslCacertBadfile = 77,
    RemoteFileNotFound = 78,
    Ssh = 79,
    SslShutdownFailed = 80,
    Again = 81,
    SslCrlBadfile = 82,
    SslIssuerError = 83,
    FtpPretFailed = 84,
    RtspCseqError = 85,
    RtspSessionError = 86,
    FtpBadFileList = 87,
    ChunkFailed = 88,
    NoConnectionAvailable = 89,
    SslPinnedpubkeynotmatch = 90,
    SslInvalidcertstatus = 91,
    Http2Stream = 92,
    RecursiveApiCall = 93,
    AuthError = 94,
    Http3 = 95,
    QuicConnectError = 96,
    Proxy = 97,
    SslClientcert = 98,
    UnrecoverablePoll = 99,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Errors raised by the storage core.
///
/// Transport failures are `Connection`, HTTP-level failures are `Response`,
/// malformed backend documents are `Parse`. `Validation` and `Unsupported`
/// are raised before any I/O takes place.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}")]
    Response { status: StatusCode, message: String },
    #[error("{message} (error code = {})", .code.code())]
    Connection { code: ErrorCode, message: String },
    #[error("{context}: {message}")]
    Parse { context: String, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    pub fn response(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            message: message.into(),
        }
    }

    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// HTTP status of a response error, if this is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Numeric key under which a response error is reported to callers:
    /// a fixed base plus the HTTP status.
    pub fn exception_code(&self) -> Option<u32> {
        self.status().map(|s| ERROR_CODE_BASE + u32::from(s.as_u16()))
    }

    /// Prefixes the message with operation context, e.g.
    /// `Failed to put object 'bkt/a.tsv': 403 Forbidden`. The prefix must
    /// already use the masked form of any sensitive path.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::Response { status, message } => Self::Response {
                status,
                message: format!("{context}: {message}"),
            },
            Self::Connection { code, message } => Self::Connection {
                code,
                message: format!("{context}: {message}"),
            },
            Self::Parse {
                context: inner,
                message,
            } => Self::Parse {
                context: format!("{context}: {inner}"),
                message,
            },
            Self::Validation(m) => Self::Validation(format!("{context}: {m}")),
            Self::Unsupported(m) => Self::Unsupported(format!("{context}: {m}")),
            Self::Unknown(m) => Self::Unknown(format!("{context}: {m}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
