use chrono::{TimeZone, Utc};
use ciphr::config::Config;
use ciphr::notify::{
    configured_sinks, format_digest, indicates_flag, publish_all, summarize_answer, CmsPublisher, DigestSink,
    FlaggedPaper, WebhookNotifier,
};
use ciphr::paper::PaperRecord;
use mockito::{Matcher, Server};
use serde_json::json;

fn flagged(title: &str, answer: &str) -> FlaggedPaper {
    let paper = PaperRecord::new(
        title,
        "http://arxiv.org/abs/2403.00077v1",
        "Abstract",
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    );
    FlaggedPaper::new(&paper, answer)
}

#[test]
fn test_flag_classification() {
    assert!(indicates_flag("Yes, the paper trains a graph neural network on detector hits."));
    assert!(indicates_flag("The authors use boosted decision trees and deep learning."));
    assert!(!indicates_flag("No, this paper does not use machine learning."));
    assert!(!indicates_flag("Not found"));
    assert!(!indicates_flag("N/A"));
    assert!(!indicates_flag(""));
    // "no" only counts as a whole word
    assert!(indicates_flag("Yes, a neural network for nonlinear unfolding."));
}

#[test]
fn test_summarize_answer_prefers_technique_list() {
    assert_eq!(
        summarize_answer("Yes. The main ML techniques are normalizing flows and transformers"),
        "are normalizing flows and transformers"
    );
    assert_eq!(summarize_answer("Yes: convolutional networks"), "convolutional networks");
    let long = format!("Yes, {}", "very ".repeat(40));
    assert!(summarize_answer(&long).ends_with("..."));
}

#[test]
fn test_digest_format() {
    let long_title = "A".repeat(80);
    let digest = format_digest(
        &[flagged(&long_title, "Yes: autoencoders"), flagged("Short | title", "Yes, CNNs")],
        Some("https://example.org/table"),
    );
    assert!(digest.contains("Found 2 papers using ML techniques"));
    assert!(digest.contains(&format!("| {}... | [Link](http://arxiv.org/abs/2403.00077v1) | autoencoders |", "A".repeat(60))));
    assert!(digest.contains("Short \\| title"));
    assert!(digest.ends_with("[View full analysis table here](https://example.org/table)"));

    let single = format_digest(&[flagged("One", "Yes")], None);
    assert!(single.contains("Found 1 paper using"));
    assert!(!single.contains("View full analysis"));
}

#[test]
fn test_webhook_posts_digest() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/hooks/abc")
        .match_body(Matcher::PartialJson(json!({
            "username": "CIPhR Bot",
            "icon_emoji": ":robot_face:"
        })))
        .with_status(200)
        .create();

    let notifier = WebhookNotifier::new(format!("{}/hooks/abc", server.url()), &Config::default()).unwrap();
    notifier
        .publish(&[flagged("Paper", "Yes, neural networks")], "")
        .unwrap();
    mock.assert();
}

#[test]
fn test_webhook_skips_when_nothing_flagged() {
    let mut server = Server::new();
    let mock = server.mock("POST", "/hooks/abc").expect(0).create();
    let notifier = WebhookNotifier::new(format!("{}/hooks/abc", server.url()), &Config::default()).unwrap();
    notifier.publish(&[], "table").unwrap();
    mock.assert();
}

#[test]
fn test_cms_publishes_table_with_token() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/posts")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({ "content": "Paper Title | arXiv Link\n" })))
        .with_status(201)
        .create();

    let publisher = CmsPublisher::new(format!("{}/api/posts", server.url()), "secret", &Config::default()).unwrap();
    publisher.publish(&[], "Paper Title | arXiv Link\n").unwrap();
    mock.assert();
}

fn quick_retries() -> Config {
    Config {
        retry_max_elapsed_secs: 1,
        ..Config::default()
    }
}

#[test]
fn test_webhook_retries_server_errors() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/hooks/abc")
        .with_status(503)
        .expect_at_least(2)
        .create();

    let notifier = WebhookNotifier::new(format!("{}/hooks/abc", server.url()), &quick_retries()).unwrap();
    let result = notifier.publish(&[flagged("Paper", "Yes, neural networks")], "");
    assert!(result.is_err());
    mock.assert();
}

#[test]
fn test_cms_rejection_is_not_retried() {
    let mut server = Server::new();
    let mock = server.mock("POST", "/api/posts").with_status(401).expect(1).create();

    let publisher = CmsPublisher::new(format!("{}/api/posts", server.url()), "wrong", &quick_retries()).unwrap();
    let err = publisher.publish(&[], "table").unwrap_err();
    assert!(err.to_string().contains("CMS returned status 401"));
    mock.assert();
}

#[test]
fn test_failures_become_warnings() {
    let mut server = Server::new();
    let _mock = server.mock("POST", "/hooks/abc").with_status(500).create();

    let config = Config {
        webhook_url: Some(format!("{}/hooks/abc", server.url())),
        retry_max_elapsed_secs: 1,
        ..Config::default()
    };
    let sinks = configured_sinks(&config).unwrap();
    assert_eq!(sinks.len(), 1);
    let warnings = publish_all(&sinks, &[flagged("Paper", "Yes")], "");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("webhook notification failed"));
}

#[test]
fn test_cms_needs_token() {
    let config = Config {
        cms_url: Some("http://localhost/api".to_string()),
        ..Config::default()
    };
    assert!(configured_sinks(&config).unwrap().is_empty());
}
