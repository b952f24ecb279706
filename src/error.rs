use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Debug, Clone)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        codec_error(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        connection_error(err)
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn connection_error<T: Debug>(err: T) -> Error {
    Error {
        code: 2,
        message: format!("connection error: {:?}", err),
    }
}

pub fn reqwest_error(_: reqwest::Error) -> Error {
    Error {
        code: 3,
        message: "reqwest error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn codec_error<T: Debug>(err: T) -> Error {
    Error {
        code: 5,
        message: format!("codec error: {:?}", err),
    }
}

pub fn session_closed_error() -> Error {
    Error {
        code: 6,
        message: "session closed".into(),
    }
}

pub fn channel_closed_error() -> Error {
    Error {
        code: 8,
        message: "coordinator channel closed".into(),
    }
}

pub fn invalid_state_error() -> Error {
    Error {
        code: 100,
        message: "invalid state".into(),
    }
}

pub fn invalid_invocation_error() -> Error {
    Error {
        code: 101,
        message: "invalid invocation".into(),
    }
}

pub fn invalid_request_error(reason: &str) -> Error {
    Error {
        code: 102,
        message: format!("invalid ride request: {}", reason),
    }
}

pub fn route_computation_error() -> Error {
    Error {
        code: 103,
        message: "route computation failed".into(),
    }
}

pub fn stale_event_error() -> Error {
    Error {
        code: 104,
        message: "stale event discarded".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: 105,
        message: "invalid input".into(),
    }
}
