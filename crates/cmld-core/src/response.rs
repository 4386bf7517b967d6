//! Device status line registry.
//!
//! Every reply the Chameleon Mini sends to a text command starts with a
//! status line of the form `<code>:<LABEL>`, e.g. `100:OK` or
//! `202:INVALID PARAMETER`. The label is the firmware's enumeration name
//! with underscores replaced by spaces. The set of codes is fixed by the
//! firmware; this module is the single table of them.

use std::fmt;

/// A status code the device can put on the first line of a reply.
///
/// 1xx codes are success/informational, 2xx codes are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    OkWithText,
    WaitingForModem,
    False,
    True,
    UnknownCommand,
    InvalidCommandUsage,
    InvalidParameter,
    Timeout,
}

impl ResponseCode {
    /// Every response code, in ascending numeric order.
    pub const ALL: [ResponseCode; 9] = [
        ResponseCode::Ok,
        ResponseCode::OkWithText,
        ResponseCode::WaitingForModem,
        ResponseCode::False,
        ResponseCode::True,
        ResponseCode::UnknownCommand,
        ResponseCode::InvalidCommandUsage,
        ResponseCode::InvalidParameter,
        ResponseCode::Timeout,
    ];

    /// The three-digit numeric code.
    pub const fn code(self) -> u16 {
        match self {
            ResponseCode::Ok => 100,
            ResponseCode::OkWithText => 101,
            ResponseCode::WaitingForModem => 110,
            ResponseCode::False => 120,
            ResponseCode::True => 121,
            ResponseCode::UnknownCommand => 200,
            ResponseCode::InvalidCommandUsage => 201,
            ResponseCode::InvalidParameter => 202,
            ResponseCode::Timeout => 203,
        }
    }

    /// The firmware enumeration name (`"INVALID_PARAMETER"`).
    pub const fn name(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::OkWithText => "OK_WITH_TEXT",
            ResponseCode::WaitingForModem => "WAITING_FOR_MODEM",
            ResponseCode::False => "FALSE",
            ResponseCode::True => "TRUE",
            ResponseCode::UnknownCommand => "UNKNOWN_COMMAND",
            ResponseCode::InvalidCommandUsage => "INVALID_COMMAND_USAGE",
            ResponseCode::InvalidParameter => "INVALID_PARAMETER",
            ResponseCode::Timeout => "TIMEOUT",
        }
    }

    /// The label as it appears on the wire (`"INVALID PARAMETER"`).
    pub const fn label(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::OkWithText => "OK WITH TEXT",
            ResponseCode::WaitingForModem => "WAITING FOR MODEM",
            ResponseCode::False => "FALSE",
            ResponseCode::True => "TRUE",
            ResponseCode::UnknownCommand => "UNKNOWN COMMAND",
            ResponseCode::InvalidCommandUsage => "INVALID COMMAND USAGE",
            ResponseCode::InvalidParameter => "INVALID PARAMETER",
            ResponseCode::Timeout => "TIMEOUT",
        }
    }

    /// Whether this is a 1xx (success/informational) code.
    pub const fn is_success(self) -> bool {
        self.code() < 200
    }

    /// The full status line without terminator, e.g. `"202:INVALID PARAMETER"`.
    pub fn status_line(self) -> String {
        format!("{}:{}", self.code(), self.label())
    }

    /// Look up a response code by its numeric value.
    pub fn from_code(code: u16) -> Option<ResponseCode> {
        Self::ALL.iter().copied().find(|rc| rc.code() == code)
    }

    /// Look up a response code by its exact status line text.
    ///
    /// The match is exact: no surrounding whitespace, no terminator, and the
    /// label must use spaces (not underscores).
    ///
    /// ```
    /// use cmld_core::ResponseCode;
    ///
    /// assert_eq!(ResponseCode::from_status_line("100:OK"), Some(ResponseCode::Ok));
    /// assert_eq!(
    ///     ResponseCode::from_status_line("202:INVALID PARAMETER"),
    ///     Some(ResponseCode::InvalidParameter)
    /// );
    /// assert_eq!(ResponseCode::from_status_line("202:INVALID_PARAMETER"), None);
    /// ```
    pub fn from_status_line(line: &str) -> Option<ResponseCode> {
        let (code, label) = line.split_once(':')?;
        let rc = Self::from_code(code.parse().ok()?)?;
        (rc.label() == label).then_some(rc)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code(), self.label())
    }
}

/// A decoded command reply: the status code plus the flattened body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    /// The status code from the first line.
    pub code: ResponseCode,
    /// Everything after the status line with line breaks and tabs removed.
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<u16> = ResponseCode::ALL.iter().map(|rc| rc.code()).collect();
        assert_eq!(codes.len(), ResponseCode::ALL.len());
    }

    #[test]
    fn label_is_name_with_spaces() {
        for rc in ResponseCode::ALL {
            assert_eq!(rc.label(), rc.name().replace('_', " "));
        }
    }

    #[test]
    fn lookup_round_trip_for_every_code() {
        for rc in ResponseCode::ALL {
            assert_eq!(ResponseCode::from_code(rc.code()), Some(rc));
            let line = format!("{}:{}", rc.code(), rc.label());
            assert_eq!(ResponseCode::from_status_line(&line), Some(rc));
            assert_eq!(rc.status_line(), line);
        }
    }

    #[test]
    fn invalid_parameter_is_202() {
        assert_eq!(ResponseCode::InvalidParameter.code(), 202);
        assert_eq!(ResponseCode::InvalidParameter.label(), "INVALID PARAMETER");
        assert_eq!(
            ResponseCode::InvalidParameter.to_string(),
            "202:INVALID PARAMETER"
        );
    }

    #[test]
    fn success_classes() {
        assert!(ResponseCode::Ok.is_success());
        assert!(ResponseCode::True.is_success());
        assert!(ResponseCode::False.is_success());
        assert!(!ResponseCode::UnknownCommand.is_success());
        assert!(!ResponseCode::Timeout.is_success());
    }

    #[test]
    fn unknown_code_lookup() {
        assert_eq!(ResponseCode::from_code(0), None);
        assert_eq!(ResponseCode::from_code(102), None);
        assert_eq!(ResponseCode::from_code(999), None);
    }

    #[test]
    fn status_line_requires_exact_match() {
        assert_eq!(ResponseCode::from_status_line("100:OK "), None);
        assert_eq!(ResponseCode::from_status_line(" 100:OK"), None);
        assert_eq!(ResponseCode::from_status_line("100:ok"), None);
        assert_eq!(ResponseCode::from_status_line("100:TRUE"), None);
        assert_eq!(ResponseCode::from_status_line("100"), None);
        assert_eq!(ResponseCode::from_status_line(""), None);
        assert_eq!(ResponseCode::from_status_line("abc:OK"), None);
    }
}
