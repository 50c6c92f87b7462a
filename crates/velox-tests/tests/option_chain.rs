//! Option chain and analytics tests.

use velox_client::{ChainParams, Error};
use velox_tests::spawn_server;

#[tokio::test]
async fn test_generated_chain_is_centered_on_spot() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");

    let chain = client
        .get_option_chain("NIFTY", &ChainParams::default())
        .await
        .expect("Failed to get chain");

    assert_eq!(chain.underlying, "NIFTY");
    assert!(chain.spot_price > 0.0);
    assert!(!chain.strikes.is_empty());
    assert!(
        chain
            .strikes
            .windows(2)
            .all(|pair| pair[0].strike < pair[1].strike)
    );
    assert!(chain.strikes.iter().all(|row| row.strike % 50.0 == 0.0));
}

#[tokio::test]
async fn test_pcr_and_max_pain() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");
    let params = ChainParams::default();

    let pcr = client.get_pcr("NIFTY", &params).await.expect("Failed to get PCR");
    assert_eq!(pcr.underlying, "NIFTY");
    assert!(pcr.total_call_oi > 0);

    let max_pain = client
        .get_max_pain("NIFTY", &params)
        .await
        .expect("Failed to get max pain");
    let chain = client
        .get_option_chain("NIFTY", &params)
        .await
        .expect("Failed to get chain");
    assert!(
        chain
            .strikes
            .iter()
            .any(|row| row.strike == max_pain.max_pain_strike)
    );
}

#[tokio::test]
async fn test_chain_analysis() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");

    let analysis = client
        .get_chain_analysis("BANKNIFTY", &ChainParams::default())
        .await
        .expect("Failed to analyze chain");

    assert_eq!(analysis.underlying, "BANKNIFTY");
    assert!(analysis.atm_strike.is_some());
}

#[tokio::test]
async fn test_unknown_underlying_not_found() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");

    let err = client
        .get_option_chain("UNKNOWN", &ChainParams::default())
        .await
        .expect_err("Chain for unknown underlying");
    assert!(matches!(err, Error::NotFound(_)));
}
