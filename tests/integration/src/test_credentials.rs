//! Credential lifecycle tests against the loopback exchange.

#[cfg(test)]
mod tests {
    use busrelay_dispatch::{AckDecision, InboundMessage, MemoryAckSink};

    use crate::Harness;

    const VALID: &str = r#"{"discriminator":"13","a":"X","b":"Y"}"#;

    fn message(offset: i64, payload: &str) -> InboundMessage {
        InboundMessage::new("payments", 0, offset, payload.to_owned())
    }

    #[tokio::test]
    async fn test_should_exchange_once_and_reuse_cached_credentials() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        for offset in 0..3 {
            assert_eq!(
                dispatcher.process(&message(offset, VALID), &sink).await,
                AckDecision::Acknowledge
            );
        }

        assert_eq!(harness.exchange.calls(), 1);
        assert_eq!(harness.primary.captured().len(), 3);

        let body = &harness.exchange.bodies()[0];
        assert_eq!(body["durationSeconds"], 3600);
        assert_eq!(body["sessionName"], "busrelay-it");
        assert_eq!(
            body["roleArn"],
            "arn:aws:iam::111122223333:role/AWS1"
        );
        assert!(body.get("profileArn").is_some());
        assert!(body.get("trustAnchorArn").is_some());
    }

    #[tokio::test]
    async fn test_should_keep_partitions_separate() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        let both = r#"{"discriminator":"13","awsDestiny":"aws1,aws2"}"#;
        dispatcher.process(&message(1, both), &sink).await;
        dispatcher.process(&message(2, both), &sink).await;

        assert_eq!(harness.exchange.calls(), 2);
        let roles: Vec<String> = harness
            .exchange
            .bodies()
            .iter()
            .filter_map(|b| b["roleArn"].as_str().map(ToOwned::to_owned))
            .collect();
        assert!(roles.iter().any(|r| r.ends_with("role/AWS1")));
        assert!(roles.iter().any(|r| r.ends_with("role/AWS2")));
    }

    #[tokio::test]
    async fn test_should_refresh_credentials_after_auth_rejection() {
        let harness = Harness::start().await.unwrap();
        harness.primary.script(&[403]);
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        assert_eq!(
            dispatcher.process(&message(1, VALID), &sink).await,
            AckDecision::Acknowledge
        );
        assert_eq!(harness.exchange.calls(), 2);
        assert_eq!(harness.primary.captured().len(), 2);
    }

    #[tokio::test]
    async fn test_should_withhold_ack_when_exchange_rejects() {
        let harness = Harness::start().await.unwrap();
        harness.exchange.reject();
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        assert_eq!(
            dispatcher.process(&message(1, VALID), &sink).await,
            AckDecision::Withhold
        );
        assert!(harness.primary.captured().is_empty());
    }

    #[tokio::test]
    async fn test_should_sign_with_sandbox_credentials_only_when_enabled() {
        let harness = Harness::start().await.unwrap();
        harness.exchange.reject();
        let dispatcher = harness
            .dispatcher(&[("SANDBOX_CREDENTIALS", "true")])
            .unwrap();
        let sink = MemoryAckSink::new();

        assert_eq!(
            dispatcher.process(&message(1, VALID), &sink).await,
            AckDecision::Acknowledge
        );
        let events = harness.primary.captured();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].verified_key.as_deref(), Some("SANDBOXACCESSKEYID"));
    }
}
