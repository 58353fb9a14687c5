use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery state of a document within the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text")]
pub enum DeliveryStatus {
    /// Row exists, pipeline has not picked the document up yet
    #[sqlx(rename = "created")]
    Created,
    /// Uploaded XML is being parsed and classified
    #[sqlx(rename = "validating")]
    Validating,
    /// A signing key is being resolved and applied
    #[sqlx(rename = "signing")]
    Signing,
    /// The signed file is being dispatched to SUNAT
    #[sqlx(rename = "sending")]
    Sending,
    /// SUNAT accepted the file for asynchronous processing; a ticket is pending
    #[sqlx(rename = "awaiting_ticket")]
    AwaitingTicket,
    /// SUNAT answered definitively (accepted or rejected); CDR stored when given
    #[sqlx(rename = "delivered")]
    Delivered,
    /// The pipeline gave up; see the document's error kind
    #[sqlx(rename = "failed")]
    Failed,
}

impl DeliveryStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Check if the document is in flight (a queue message owns it)
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::Signing | Self::Sending | Self::AwaitingTicket
        )
    }
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Validating => write!(f, "validating"),
            Self::Signing => write!(f, "signing"),
            Self::Sending => write!(f, "sending"),
            Self::AwaitingTicket => write!(f, "awaiting_ticket"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "validating" => Ok(Self::Validating),
            "signing" => Ok(Self::Signing),
            "sending" => Ok(Self::Sending),
            "awaiting_ticket" => Ok(Self::AwaitingTicket),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid delivery status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Created.is_terminal());
        assert!(!DeliveryStatus::Sending.is_terminal());
        assert!(!DeliveryStatus::AwaitingTicket.is_terminal());
    }

    #[test]
    fn test_in_flight_check() {
        assert!(DeliveryStatus::Sending.is_in_flight());
        assert!(DeliveryStatus::AwaitingTicket.is_in_flight());
        assert!(!DeliveryStatus::Created.is_in_flight());
        assert!(!DeliveryStatus::Delivered.is_in_flight());
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(DeliveryStatus::AwaitingTicket.to_string(), "awaiting_ticket");
        assert_eq!(
            "awaiting_ticket".parse::<DeliveryStatus>().unwrap(),
            DeliveryStatus::AwaitingTicket
        );
        assert!("bogus".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&DeliveryStatus::Sending).unwrap();
        assert_eq!(json, "\"sending\"");
        let parsed: DeliveryStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, DeliveryStatus::Sending);
    }

    #[test]
    fn test_sqlx_maps_to_text() {
        use sqlx::{Postgres, Type, TypeInfo};

        let info = <DeliveryStatus as Type<Postgres>>::type_info();
        assert!(info.name().eq_ignore_ascii_case("text"));
        // Must decode from / encode into the TEXT column the schema declares
        assert!(<DeliveryStatus as Type<Postgres>>::compatible(
            &<String as Type<Postgres>>::type_info()
        ));
    }
}
