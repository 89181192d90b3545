/// mock flow - three flatmates settle an electricity bill through the mock gateway
use std::sync::Arc;

use apartment_ledger::gateways::{MockGateway, SimulatedProvider, MOCK_GATEWAY};
use apartment_ledger::{
    BillService, BillType, GatewayRegistry, LedgerConfig, MembershipSource, MemoryObjectStorage,
    MemoryStore, Money, NewBill, PaymentLedger, SafeTimeProvider, TimeSource, Url, Uuid,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
settlement:
  gateway_timeout_ms: 2000
  pending_ttl_secs: 900
share:
  remainder_policy: earliest_members
"#;

const CALLBACK: &str = "http://localhost:8080/api/v1/payment/callback/mock-gateway";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    tracing_subscriber::fmt().with_env_filter(env).init();

    println!("=== mock gateway flow ===\n");

    let config = LedgerConfig::load(CONFIG)?;
    let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
    )));
    let controller = time.test_control().unwrap();

    let store = Arc::new(MemoryStore::new(time.clone(), &config));
    let bills = BillService::new(store.clone(), Arc::new(MemoryObjectStorage::new()));

    let provider = Arc::new(SimulatedProvider::new());
    let registry = GatewayRegistry::builder()
        .register(
            MOCK_GATEWAY,
            MockGateway::with_provider(Url::parse("http://localhost:8080")?, provider.clone()),
        )
        .build();
    let ledger = PaymentLedger::new(
        store.clone(),
        store.clone(),
        registry,
        config.settlement.clone(),
        time.clone(),
    );
    println!("gateways: {:?}\n", ledger.supported_gateways());

    // three flatmates move in on the same day
    let apartment = Uuid::new_v4();
    let flatmates: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for user in &flatmates {
        store.add_member(*user, apartment, time.now()).await?;
    }

    controller.advance(Duration::days(30));
    let bill = bills
        .add_bill(
            NewBill {
                name: "january electricity".to_string(),
                bill_type: BillType::Electricity,
                bill_number: 4711,
                amount: Money::from_minor(300),
                due_date: NaiveDate::from_ymd_opt(2025, 2, 15).unwrap(),
                apartment_id: apartment,
                image_key: None,
            },
            None,
        )
        .await?;
    println!("bill {} for {} recorded on {}", bill.bill_number, bill.amount, time.now().format("%Y-%m-%d"));

    let payer = flatmates[0];
    for share in bills.user_bill_shares(payer).await? {
        println!(
            "  share: {} of {} across {} members, due {}",
            share.share_per_user, share.total_amount, share.member_count, share.balance_due
        );
    }

    // payer is redirected to the gateway, which calls back
    let redirect = ledger.pay_bill(MOCK_GATEWAY, payer, bill.id, CALLBACK).await?;
    println!("\nredirect: {:?} {}", redirect.method, redirect.url);
    println!("  body: {}", serde_json::Value::Object(redirect.body.clone()));

    let callback = provider.complete(&redirect)?;
    let settled = ledger.handle_callback(MOCK_GATEWAY, &callback).await?;
    println!("settled {} payment(s)", settled.len());

    // a replayed callback is refused
    if let Err(err) = ledger.handle_callback(MOCK_GATEWAY, &callback).await {
        println!("replay rejected: {err} ({:?})", err.kind());
    }

    println!("\nafter payment:");
    for (i, user) in flatmates.iter().enumerate() {
        println!("  flatmate {}: total debt {}", i + 1, bills.user_total_debt(*user).await?);
    }

    println!("\nevents:");
    for event in ledger.take_events() {
        println!("  {}", serde_json::to_string(&event)?);
    }

    Ok(())
}
