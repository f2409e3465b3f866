//! AngelOne adapter flows against a mock SmartAPI server: the vendor
//! header block, string-quoted numerics, `data: null` normalization, the
//! error-code table, and order placement in the SmartAPI vocabulary.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use dalal::error::DalalError;
use dalal::instruments::InstrumentStore;
use dalal::models::enums::{Exchange, OnStale, OptionType, OrderStatus, OrderType, ProductType, Side};
use dalal::models::Instrument;
use dalal::{Config, DalalClient};

fn scrip_master() -> String {
    json!([
        {"token": "99926000", "symbol": "Nifty 50", "name": "NIFTY",
         "expiry": "", "strike": "-1.000000", "lotsize": "1",
         "instrumenttype": "AMXIDX", "exch_seg": "NSE", "tick_size": ""},
        {"token": "3045", "symbol": "SBIN-EQ", "name": "STATE BANK OF INDIA",
         "expiry": "", "strike": "-1.000000", "lotsize": "1",
         "instrumenttype": "", "exch_seg": "NSE", "tick_size": "5.000000"},
        {"token": "43567", "symbol": "NIFTY26FEB26FUT", "name": "NIFTY",
         "expiry": "26FEB2026", "strike": "-1.000000", "lotsize": "50",
         "instrumenttype": "FUTIDX", "exch_seg": "NFO", "tick_size": "5.000000"},
        {"token": "43568", "symbol": "NIFTY26FEB2623000CE", "name": "NIFTY",
         "expiry": "26FEB2026", "strike": "2300000.000000", "lotsize": "50",
         "instrumenttype": "OPTIDX", "exch_seg": "NFO", "tick_size": "5.000000"}
    ])
    .to_string()
}

async fn client_for(server: &mut ServerGuard) -> DalalClient {
    server
        .mock("GET", "/scrips.json")
        .with_body(scrip_master())
        .create_async()
        .await;

    let config = Config::new()
        .set("api_key", "smart_key")
        .set("client_id", "A123456")
        .set("access_token", "test-jwt")
        .set("auth_mode", "manual")
        .set("base_url", server.url())
        .set("instruments_url", format!("{}/scrips.json", server.url()));
    let store = InstrumentStore::open_in_memory("angelone", OnStale::Fail).unwrap();
    let client = DalalClient::with_store("angelone", config, store).unwrap();
    client.init().await.unwrap();
    client
}

#[tokio::test]
async fn requests_carry_the_vendor_header_block() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    let mock = server
        .mock("GET", "/rest/auth/angelbroking/user/v1/getProfile")
        .match_header("authorization", "Bearer test-jwt")
        .match_header("x-usertype", "USER")
        .match_header("x-sourceid", "WEB")
        .match_header("x-privatekey", "smart_key")
        .match_header("x-macaddress", Matcher::Any)
        .with_body(
            json!({
                "status": true,
                "message": "SUCCESS",
                "data": {
                    "clientcode": "A123456",
                    "name": "Test User",
                    "email": "test@example.com",
                    "mobileno": "9999999999"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let profile = client.get_profile().await.unwrap();
    assert_eq!(profile.client_id, "A123456");
    mock.assert_async().await;
}

#[tokio::test]
async fn funds_parse_string_quoted_numbers() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    server
        .mock("GET", "/rest/auth/angelbroking/user/v1/getRMS")
        .with_body(
            json!({
                "status": true,
                "data": {
                    "net": "10000.00",
                    "availablecash": "9500.50",
                    "utiliseddebits": "499.50",
                    "collateral": "0.00",
                    "m2munrealized": "0.00",
                    "m2mrealized": "0.00"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let funds = client.get_funds().await.unwrap();
    assert!((funds.total - 10000.0).abs() < 1e-9);
    assert!((funds.available - 9500.5).abs() < 1e-9);
}

#[tokio::test]
async fn null_data_normalizes_to_empty_books() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    server
        .mock("GET", "/rest/auth/angelbroking/portfolio/v1/getHolding")
        .with_body(json!({"status": true, "data": null}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/rest/auth/angelbroking/order/v1/getPosition")
        .with_body(json!({"status": true, "data": null}).to_string())
        .create_async()
        .await;

    assert!(client.get_holdings().await.unwrap().is_empty());
    assert!(client.get_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn place_order_uses_the_smartapi_vocabulary() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    let mock = server
        .mock("POST", "/rest/auth/angelbroking/order/v1/placeOrder")
        .match_header("authorization", "Bearer test-jwt")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "variety": "NORMAL",
                "tradingsymbol": "NIFTY26FEB2623000CE",
                "symboltoken": "43568",
                "transactiontype": "SELL",
                "exchange": "NFO",
                "ordertype": "LIMIT",
                "producttype": "CARRYFORWARD",
                "duration": "DAY",
                "quantity": "50",
                "price": "120.5"
            })),
        ]))
        .with_body(
            json!({
                "status": true,
                "message": "SUCCESS",
                "data": {"script": "NIFTY26FEB2623000CE", "orderid": "230221000000002"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let option = Instrument::option(
        Exchange::NSE,
        "NIFTY",
        chrono::NaiveDate::from_ymd_opt(2026, 2, 26).unwrap(),
        23000.0,
        OptionType::CE,
    );
    let order_id = client
        .place_order(
            &option,
            50,
            Side::Sell,
            ProductType::NRML,
            OrderType::Limit,
            Some(120.5),
            None,
        )
        .await
        .unwrap();
    assert_eq!(order_id, "230221000000002");
    mock.assert_async().await;
}

#[tokio::test]
async fn bse_derivatives_are_rejected_by_capabilities() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    // AngelOne has no BFO segment: BSE-underlying derivatives must fail
    // locally, before any HTTP.
    let mock = server
        .mock("POST", "/rest/auth/angelbroking/order/v1/placeOrder")
        .expect(0)
        .create_async()
        .await;

    let sensex_fut = Instrument::future(
        Exchange::BSE,
        "SENSEX",
        chrono::NaiveDate::from_ymd_opt(2026, 2, 26).unwrap(),
    );
    let err = client
        .place_order(
            &sensex_fut,
            10,
            Side::Buy,
            ProductType::NRML,
            OrderType::Market,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DalalError::UnsupportedFeature { .. }));
    assert!(err.to_string().contains("BFO"));
    mock.assert_async().await;
}

#[tokio::test]
async fn error_codes_map_through_the_table() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    server
        .mock("POST", "/rest/auth/angelbroking/order/v1/cancelOrder")
        .with_body(
            json!({
                "status": false,
                "message": "Order not found",
                "errorcode": "AB1013"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client.cancel_order("does-not-exist").await.unwrap_err();
    assert!(matches!(err, DalalError::OrderNotFound { .. }));
    assert_eq!(err.broker_code(), Some("AB1013"));
}

#[tokio::test]
async fn get_order_filters_the_order_book() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    server
        .mock("GET", "/rest/auth/angelbroking/order/v1/getOrderBook")
        .with_body(
            json!({
                "status": true,
                "data": [
                    {"orderid": "A", "tradingsymbol": "SBIN-EQ", "exchange": "NSE",
                     "transactiontype": "BUY", "quantity": "10", "filledshares": "0",
                     "producttype": "DELIVERY", "ordertype": "LIMIT",
                     "status": "open", "price": "600.0"},
                    {"orderid": "B", "tradingsymbol": "SBIN-EQ", "exchange": "NSE",
                     "transactiontype": "SELL", "quantity": "5", "filledshares": "5",
                     "producttype": "DELIVERY", "ordertype": "MARKET",
                     "status": "complete"}
                ]
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let order = client.get_order("B").await.unwrap();
    assert_eq!(order.status, OrderStatus::Complete);
    assert_eq!(order.qty, 5);

    let err = client.get_order("Z").await.unwrap_err();
    assert!(matches!(err, DalalError::OrderNotFound { .. }));
}

#[tokio::test]
async fn margin_calculation_is_an_unsupported_feature() {
    let mut server = Server::new_async().await;
    let client = client_for(&mut server).await;

    let err = client.get_margins(json!({})).await.unwrap_err();
    assert!(matches!(err, DalalError::UnsupportedFeature { .. }));
}
