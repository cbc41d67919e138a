//! End-to-end delivery tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use busrelay_dispatch::{
        AckDecision, DispatchError, DispatchReport, InboundMessage, MemoryAckSink, PartitionRelay,
    };

    use crate::{Harness, ISSUED_ACCESS_KEY, ISSUED_SESSION_TOKEN};

    fn message(offset: i64, payload: &str) -> InboundMessage {
        InboundMessage::new("payments", 0, offset, payload.to_owned())
    }

    #[tokio::test]
    async fn test_should_deliver_one_signed_event_to_primary() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        let decision = dispatcher
            .process(&message(1, r#"{"discriminator":"13","a":"X","b":"Y"}"#), &sink)
            .await;
        assert_eq!(decision, AckDecision::Acknowledge);

        let events = harness.primary.captured();
        assert_eq!(events.len(), 1);
        assert!(harness.secondary.captured().is_empty());

        let event = &events[0];
        assert_eq!(event.verified_key.as_deref(), Some(ISSUED_ACCESS_KEY));
        assert_eq!(event.headers["x-amz-target"], "AWSEvents.PutEvents");
        assert_eq!(event.headers["content-type"], "application/x-amz-json-1.1");
        assert_eq!(event.headers["x-amz-security-token"], ISSUED_SESSION_TOKEN);

        let authorization = event.headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with(&format!(
            "AWS4-HMAC-SHA256 Credential={ISSUED_ACCESS_KEY}/"
        )));
        assert!(authorization.contains("/eu-west-1/events/aws4_request, SignedHeaders="));

        let entry = &event.body["Entries"][0];
        assert_eq!(entry["Source"], "openbank.payments");
        assert_eq!(entry["DetailType"], "Transfer_KO");
        assert_eq!(entry["EventBusName"], "aws1-bus");
        assert_eq!(entry["Detail"], r#"{"payload":{"operationId":"XY"}}"#);
    }

    #[tokio::test]
    async fn test_should_skip_invalid_message_without_network_calls() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        let decision = dispatcher
            .process(&message(1, r#"{"discriminator":"12","a":"X"}"#), &sink)
            .await;

        assert_eq!(decision, AckDecision::Acknowledge);
        assert!(harness.primary.captured().is_empty());
        assert_eq!(harness.exchange.calls(), 0);
    }

    #[tokio::test]
    async fn test_should_route_to_secondary_when_requested() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = harness.dispatcher(&[]).unwrap();

        let report = dispatcher
            .dispatch(&message(
                1,
                r#"{"discriminator":"13","a":"X","b":"Y","awsDestiny":"aws2"}"#,
            ))
            .await
            .unwrap();

        assert!(matches!(report, DispatchReport::Delivered { .. }));
        assert!(harness.primary.captured().is_empty());
        let events = harness.secondary.captured();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body["Entries"][0]["EventBusName"], "aws2-bus");
    }

    #[tokio::test]
    async fn test_should_acknowledge_when_only_optional_destination_fails() {
        let harness = Harness::start().await.unwrap();
        harness.secondary.respond_with(500);
        let dispatcher = harness.dispatcher(&[]).unwrap();
        let sink = MemoryAckSink::new();

        let decision = dispatcher
            .process(
                &message(1, r#"{"discriminator":"13","awsDestiny":"aws1,aws2"}"#),
                &sink,
            )
            .await;

        assert_eq!(decision, AckDecision::Acknowledge);
        assert_eq!(harness.primary.captured().len(), 1);
        assert_eq!(harness.secondary.captured().len(), 2);
    }

    #[tokio::test]
    async fn test_should_withhold_ack_when_primary_keeps_failing() {
        let harness = Harness::start().await.unwrap();
        harness.primary.respond_with(503);
        let dispatcher = harness.dispatcher(&[]).unwrap();

        let err = dispatcher
            .dispatch(&message(1, r#"{"discriminator":"13"}"#))
            .await
            .unwrap_err();
        let DispatchError::PartialDispatchFailure { failed, .. } = err;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].as_str(), "aws1");
        assert_eq!(harness.primary.captured().len(), 2);

        let sink = MemoryAckSink::new();
        assert_eq!(
            dispatcher
                .process(&message(2, r#"{"discriminator":"13"}"#), &sink)
                .await,
            AckDecision::Withhold
        );
    }

    #[tokio::test]
    async fn test_should_recover_from_transient_failure() {
        let harness = Harness::start().await.unwrap();
        harness.primary.script(&[500]);
        let dispatcher = harness.dispatcher(&[]).unwrap();

        let report = dispatcher
            .dispatch(&message(1, r#"{"discriminator":"13"}"#))
            .await
            .unwrap();

        let DispatchReport::Delivered { outcomes, .. } = report else {
            panic!("expected delivery");
        };
        assert!(outcomes[0].succeeded());
        assert_eq!(harness.primary.captured().len(), 2);
    }

    #[tokio::test]
    async fn test_should_preserve_partition_order_through_relay() {
        let harness = Harness::start().await.unwrap();
        let dispatcher = Arc::new(harness.dispatcher(&[]).unwrap());
        let sink = Arc::new(MemoryAckSink::new());
        let mut relay = PartitionRelay::new(dispatcher, sink.clone(), 2);

        for offset in 0..4 {
            for partition in 0..2 {
                let payload = format!(r#"{{"discriminator":"13","a":"p{partition}","b":"o{offset}"}}"#);
                relay
                    .submit(InboundMessage::new("payments", partition, offset, payload))
                    .await
                    .unwrap();
            }
        }
        assert_eq!(relay.shutdown().await, 8);

        let records = sink.records();
        assert!(records.iter().all(|r| r.decision == AckDecision::Acknowledge));
        for partition in 0..2 {
            let offsets: Vec<i64> = records
                .iter()
                .filter(|r| r.partition == partition)
                .map(|r| r.offset)
                .collect();
            assert_eq!(offsets, vec![0, 1, 2, 3]);

            let ids: Vec<String> = harness
                .primary
                .captured()
                .iter()
                .filter_map(|e| e.body["Entries"][0]["Detail"].as_str().map(ToOwned::to_owned))
                .filter(|detail| detail.contains(&format!("p{partition}o")))
                .collect();
            assert_eq!(ids.len(), 4);
            for (offset, detail) in ids.iter().enumerate() {
                assert!(detail.contains(&format!("p{partition}o{offset}")));
            }
        }
    }

    #[tokio::test]
    async fn test_should_withhold_ack_when_primary_times_out() {
        let harness = Harness::start().await.unwrap();
        harness.primary.delay_responses(Duration::from_secs(3));
        let dispatcher = harness
            .dispatcher(&[("DELIVERY_TIMEOUT_MS", "100")])
            .unwrap();

        let started = Instant::now();
        let err = dispatcher
            .dispatch(&message(1, r#"{"discriminator":"13"}"#))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));

        let DispatchError::PartialDispatchFailure { failed, outcomes } = err;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].as_str(), "aws1");
        let reason = outcomes[0].failure_reason().unwrap();
        assert!(reason.contains("timed out"), "unexpected reason: {reason}");

        let sink = MemoryAckSink::new();
        assert_eq!(
            dispatcher
                .process(&message(2, r#"{"discriminator":"13"}"#), &sink)
                .await,
            AckDecision::Withhold
        );
    }

    #[tokio::test]
    async fn test_should_acknowledge_when_optional_destination_times_out() {
        let harness = Harness::start().await.unwrap();
        harness.secondary.delay_responses(Duration::from_secs(3));
        let dispatcher = harness
            .dispatcher(&[("DELIVERY_TIMEOUT_MS", "100")])
            .unwrap();

        let report = dispatcher
            .dispatch(&message(
                1,
                r#"{"discriminator":"13","awsDestiny":"aws1,aws2"}"#,
            ))
            .await
            .unwrap();

        let DispatchReport::Delivered { outcomes, .. } = report else {
            panic!("expected delivery");
        };
        let primary = outcomes.iter().find(|o| o.destination.as_str() == "aws1").unwrap();
        let secondary = outcomes.iter().find(|o| o.destination.as_str() == "aws2").unwrap();
        assert!(primary.succeeded());
        assert!(secondary.failure_reason().unwrap().contains("timed out"));
        assert_eq!(harness.primary.captured().len(), 1);
    }
}
