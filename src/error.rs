//! The error kinds the control plane can report, and their wire codes.

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("no such entry")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("administrative privileges required")]
    PermissionDenied,
    #[error("out of memory")]
    OutOfMemory,
    #[error("operation not supported by this translator flavor")]
    Unsupported,
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),
}

impl Error {
    /// The negative errno-style code the wire protocol carries.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArg(_) | Error::VersionMismatch(_) => -22, // EINVAL
            Error::NotFound => -2,                                  // ENOENT
            Error::AlreadyExists => -17,                            // EEXIST
            Error::PermissionDenied => -1,                          // EPERM
            Error::OutOfMemory => -12,                              // ENOMEM
            Error::Unsupported => -95,                              // EOPNOTSUPP
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<prefix_pool::error::Error> for Error {
    fn from(err: prefix_pool::error::Error) -> Self {
        use prefix_pool::error::Error as Pool;
        match err {
            Pool::Exists(_) => Error::AlreadyExists,
            Pool::NotFound(_) => Error::NotFound,
            other => Error::InvalidArg(other.to_string()),
        }
    }
}

impl From<nat_state::error::Error> for Error {
    fn from(err: nat_state::error::Error) -> Self {
        use nat_state::error::Error as Nat;
        match err {
            Nat::BibExists6(_) | Nat::BibExists4(_) | Nat::SessionExists => Error::AlreadyExists,
            Nat::BibNotFound | Nat::Pool4NotFound => Error::NotFound,
            other => Error::InvalidArg(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_codes() {
        assert_eq!(Error::InvalidArg("x".into()).errno(), -22);
        assert_eq!(Error::NotFound.errno(), -2);
        assert_eq!(Error::AlreadyExists.errno(), -17);
        assert_eq!(Error::PermissionDenied.errno(), -1);
        assert_eq!(Error::Unsupported.errno(), -95);
    }

    #[test]
    fn test_pool_error_mapping() {
        let err: Error = prefix_pool::error::Error::Exists("10.0.0.0/8".parse().unwrap()).into();
        assert_eq!(err, Error::AlreadyExists);
        let err: Error =
            prefix_pool::error::Error::NotFound("10.0.0.0/8".parse().unwrap()).into();
        assert_eq!(err, Error::NotFound);
        let err: Error = prefix_pool::error::Error::BadPrefixLength(97).into();
        assert!(matches!(err, Error::InvalidArg(_)));
    }
}
