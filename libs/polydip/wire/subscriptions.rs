//! Subscription frames for the market and user channels.

use serde::Serialize;

/// Initial subscription for the market channel
///
/// Sent once after connecting; the server replies with book snapshots for
/// every listed asset.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSubscription {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub assets_ids: Vec<String>,
}

impl MarketSubscription {
    pub fn new(assets_ids: Vec<String>) -> Self {
        Self {
            msg_type: "MARKET".to_string(),
            assets_ids,
        }
    }
}

/// Dynamic subscription mutation on an already-open market connection
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionOp {
    pub operation: String,
    pub assets_ids: Vec<String>,
}

impl SubscriptionOp {
    pub fn subscribe(assets_ids: Vec<String>) -> Self {
        Self {
            operation: "subscribe".to_string(),
            assets_ids,
        }
    }

    pub fn unsubscribe(assets_ids: Vec<String>) -> Self {
        Self {
            operation: "unsubscribe".to_string(),
            assets_ids,
        }
    }
}

/// Authentication payload for the user channel
#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Initial subscription for the user channel
#[derive(Debug, Clone, Serialize)]
pub struct UserSubscription {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub auth: AuthPayload,
    pub markets: Vec<String>,
}

impl UserSubscription {
    pub fn new(api_key: String, secret: String, passphrase: String, markets: Vec<String>) -> Self {
        Self {
            msg_type: "USER".to_string(),
            auth: AuthPayload {
                api_key,
                secret,
                passphrase,
            },
            markets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_subscription_serialization() {
        let sub = MarketSubscription::new(vec!["111".to_string(), "222".to_string()]);
        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains("\"type\":\"MARKET\""));
        assert!(json.contains("\"assets_ids\":[\"111\",\"222\"]"));
    }

    #[test]
    fn test_subscription_op_serialization() {
        let sub = SubscriptionOp::subscribe(vec!["111".to_string()]);
        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains("\"operation\":\"subscribe\""));

        let unsub = SubscriptionOp::unsubscribe(vec!["111".to_string()]);
        let json = serde_json::to_string(&unsub).unwrap();
        assert!(json.contains("\"operation\":\"unsubscribe\""));
    }

    #[test]
    fn test_user_subscription_serialization() {
        let sub = UserSubscription::new(
            "key".to_string(),
            "secret".to_string(),
            "phrase".to_string(),
            vec!["0xmarket".to_string()],
        );
        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains("\"type\":\"USER\""));
        assert!(json.contains("\"apiKey\":\"key\""));
        assert!(json.contains("\"markets\":[\"0xmarket\"]"));
    }
}
