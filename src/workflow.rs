use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("cannot move booking from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("not enough spots remaining: {requested} requested, {spots_remaining} left")]
    CapacityExceeded { spots_remaining: i64, requested: i64 },

    #[error("capacity_dogs must be at least 1")]
    InvalidCapacity,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("ends_at must be after starts_at")]
    TimeRangeOrder,

    #[error("end_date must be on or after start_date")]
    DateRangeOrder,
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::InvalidTransition { .. } => "invalid_state",
            WorkflowError::CapacityExceeded { .. } => "capacity_exceeded",
            _ => "bad_params",
        }
    }
}

/// Canonical booking status. Replaces the old `booking_status` + `status`
/// column pair; the old vocabulary survives only as [`BookingStatus::legacy_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingStatus {
    Draft,
    PendingApproval,
    Approved,
    Denied,
    Completed,
    Cancelled,
}

/// SQL list of the statuses for which [`BookingStatus::holds_capacity`] is true.
pub const CAPACITY_HOLDING_SQL: &str = "('DRAFT','PENDING_APPROVAL','APPROVED','COMPLETED')";

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Draft,
        BookingStatus::PendingApproval,
        BookingStatus::Approved,
        BookingStatus::Denied,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Draft => "DRAFT",
            BookingStatus::PendingApproval => "PENDING_APPROVAL",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Denied => "DENIED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        let t = raw.trim();
        BookingStatus::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| WorkflowError::UnknownValue {
                kind: "booking status",
                value: t.to_string(),
            })
    }

    pub fn legacy_label(self) -> &'static str {
        match self {
            BookingStatus::Draft => "draft",
            BookingStatus::PendingApproval => "pending",
            BookingStatus::Approved => "scheduled",
            BookingStatus::Denied => "denied",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn holds_capacity(self) -> bool {
        !matches!(self, BookingStatus::Denied | BookingStatus::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Denied | BookingStatus::Completed | BookingStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Denied)
                | (PendingApproval, Cancelled)
                | (Draft, Approved)
                | (Draft, Denied)
                | (Draft, Completed)
                | (Draft, Cancelled)
                | (Approved, Completed)
                | (Approved, Cancelled)
        )
    }

    pub fn transition(self, next: BookingStatus) -> Result<BookingStatus, WorkflowError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WorkflowError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Statuses a booking may be in for a move to `next` to be legal.
    pub fn sources_of(next: BookingStatus) -> Vec<BookingStatus> {
        BookingStatus::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Fold the old pair of columns into one status. A terminal legacy
    /// `status` (completed/cancelled/denied) wins over `booking_status`.
    pub fn from_legacy(booking_status: Option<&str>, status: Option<&str>) -> BookingStatus {
        let legacy = status.map(|s| s.trim().to_ascii_lowercase());
        match legacy.as_deref() {
            Some("completed") => return BookingStatus::Completed,
            Some("cancelled") | Some("canceled") => return BookingStatus::Cancelled,
            Some("denied") => return BookingStatus::Denied,
            _ => {}
        }
        if let Some(bs) = booking_status {
            if let Ok(parsed) = BookingStatus::parse(bs) {
                return parsed;
            }
        }
        match legacy.as_deref() {
            Some("scheduled") | Some("approved") => BookingStatus::Approved,
            Some("pending") => BookingStatus::PendingApproval,
            _ => BookingStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Available,
    Locked,
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Available => "AVAILABLE",
            SlotStatus::Locked => "LOCKED",
            SlotStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(SlotStatus::Available),
            "LOCKED" => Ok(SlotStatus::Locked),
            "CANCELLED" => Ok(SlotStatus::Cancelled),
            other => Err(WorkflowError::UnknownValue {
                kind: "slot status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkType {
    Group,
    Private,
}

impl WalkType {
    pub fn as_str(self) -> &'static str {
        match self {
            WalkType::Group => "GROUP",
            WalkType::Private => "PRIVATE",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GROUP" => Ok(WalkType::Group),
            "PRIVATE" => Ok(WalkType::Private),
            other => Err(WorkflowError::UnknownValue {
                kind: "walk type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveType {
    Vacation,
    Sick,
    Personal,
    Other,
}

impl LeaveType {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveType::Vacation => "vacation",
            LeaveType::Sick => "sick",
            LeaveType::Personal => "personal",
            LeaveType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vacation" => Ok(LeaveType::Vacation),
            "sick" => Ok(LeaveType::Sick),
            "personal" => Ok(LeaveType::Personal),
            "other" => Ok(LeaveType::Other),
            other => Err(WorkflowError::UnknownValue {
                kind: "leave type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(LeaveStatus::Pending),
            "approved" => Ok(LeaveStatus::Approved),
            "rejected" => Ok(LeaveStatus::Rejected),
            other => Err(WorkflowError::UnknownValue {
                kind: "leave status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Admin,
    Client,
    Walker,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Client => "client",
            UserRole::Walker => "walker",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "client" => Ok(UserRole::Client),
            "walker" => Ok(UserRole::Walker),
            other => Err(WorkflowError::UnknownValue {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

pub fn spots_remaining(capacity_dogs: i64, booked_dogs: i64) -> i64 {
    (capacity_dogs - booked_dogs).max(0)
}

pub fn check_capacity(
    capacity_dogs: i64,
    booked_dogs: i64,
    requested: i64,
) -> Result<(), WorkflowError> {
    let left = spots_remaining(capacity_dogs, booked_dogs);
    if requested > left {
        return Err(WorkflowError::CapacityExceeded {
            spots_remaining: left,
            requested,
        });
    }
    Ok(())
}

pub fn validate_capacity(capacity_dogs: i64) -> Result<(), WorkflowError> {
    if capacity_dogs < 1 {
        return Err(WorkflowError::InvalidCapacity);
    }
    Ok(())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, WorkflowError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| WorkflowError::InvalidTimestamp(raw.to_string()))
}

/// Fixed-width so that lexical order in SQLite matches time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn normalize_timestamp(raw: &str) -> Result<String, WorkflowError> {
    parse_timestamp(raw).map(format_timestamp)
}

pub fn validate_time_range(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    if ends_at <= starts_at {
        return Err(WorkflowError::TimeRangeOrder);
    }
    Ok(())
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, WorkflowError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| WorkflowError::InvalidDate(raw.to_string()))
}

pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), WorkflowError> {
    if end < start {
        return Err(WorkflowError::DateRangeOrder);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_requests_only_resolve_to_decisions_or_withdrawal() {
        let p = BookingStatus::PendingApproval;
        assert!(p.can_transition_to(BookingStatus::Approved));
        assert!(p.can_transition_to(BookingStatus::Denied));
        assert!(p.can_transition_to(BookingStatus::Cancelled));
        assert!(!p.can_transition_to(BookingStatus::Completed));
        assert!(!p.can_transition_to(BookingStatus::Draft));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in BookingStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in BookingStatus::ALL {
                assert!(!from.can_transition_to(to), "{:?} -> {:?}", from, to);
            }
        }
        let e = BookingStatus::Completed
            .transition(BookingStatus::Approved)
            .unwrap_err();
        assert_eq!(e.code(), "invalid_state");
        assert_eq!(e.to_string(), "cannot move booking from COMPLETED to APPROVED");
    }

    #[test]
    fn approve_sources_are_pending_and_draft() {
        let sources = BookingStatus::sources_of(BookingStatus::Approved);
        assert_eq!(
            sources,
            vec![BookingStatus::Draft, BookingStatus::PendingApproval]
        );
    }

    #[test]
    fn capacity_sql_matches_holds_capacity() {
        for s in BookingStatus::ALL {
            let quoted = format!("'{}'", s.as_str());
            assert_eq!(
                CAPACITY_HOLDING_SQL.contains(&quoted),
                s.holds_capacity(),
                "{:?}",
                s
            );
        }
    }

    #[test]
    fn legacy_pairs_fold_into_one_status() {
        use BookingStatus::*;
        let cases = [
            (Some("PENDING_APPROVAL"), Some("pending"), PendingApproval),
            (Some("APPROVED"), Some("scheduled"), Approved),
            (Some("APPROVED"), Some("completed"), Completed),
            (Some("APPROVED"), Some("cancelled"), Cancelled),
            (Some("DENIED"), Some("denied"), Denied),
            (None, Some("scheduled"), Approved),
            (None, Some("approved"), Approved),
            (None, Some("pending"), PendingApproval),
            (None, Some("draft"), Draft),
            (None, None, Draft),
            (Some("garbage"), Some("whatever"), Draft),
        ];
        for (bs, st, expected) in cases {
            assert_eq!(BookingStatus::from_legacy(bs, st), expected, "{:?}/{:?}", bs, st);
        }
    }

    #[test]
    fn legacy_labels_keep_old_vocabulary() {
        assert_eq!(BookingStatus::Approved.legacy_label(), "scheduled");
        assert_eq!(BookingStatus::PendingApproval.legacy_label(), "pending");
        assert_eq!(BookingStatus::parse("approved"), Ok(BookingStatus::Approved));
        assert!(BookingStatus::parse("scheduled").is_err());
    }

    #[test]
    fn capacity_check_reports_spots_left() {
        assert!(check_capacity(4, 2, 2).is_ok());
        assert_eq!(
            check_capacity(4, 3, 2),
            Err(WorkflowError::CapacityExceeded {
                spots_remaining: 1,
                requested: 2
            })
        );
        assert_eq!(spots_remaining(2, 5), 0);
        assert!(validate_capacity(0).is_err());
    }

    #[test]
    fn date_range_accepts_same_day() {
        let start = parse_date("2024-06-10").expect("start");
        assert!(validate_date_range(start, parse_date("2024-06-10").expect("end")).is_ok());
        let err = validate_date_range(start, parse_date("2024-06-05").expect("end")).unwrap_err();
        assert_eq!(err.to_string(), "end_date must be on or after start_date");
        assert!(parse_date("2024-13-01").is_err());
    }

    #[test]
    fn timestamps_normalize_to_utc_micros() {
        let n = normalize_timestamp("2030-01-05T10:00:00+01:00").expect("normalize");
        assert_eq!(n, "2030-01-05T09:00:00.000000Z");
        let start = parse_timestamp("2030-01-05T09:00:00Z").expect("start");
        assert!(validate_time_range(start, start).is_err());
    }
}
