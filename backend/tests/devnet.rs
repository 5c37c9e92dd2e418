use chrono::NaiveDate;
use payroll_core::config::PayrollConfig;
use payroll_core::devnet::DevnetClient;
use payroll_core::encryption::EncryptionService;
use payroll_core::ledger::LedgerProgram;
use payroll_core::session::DevWallet;
use payroll_core::types::{Address, BitWidth, EncryptRequest, PaymentStatus, PlainValue};
use payroll_core::{ErrorKind, PayrollService, SalaryTerms};
use payroll_devnet::config::{DevnetConfig, DEFAULT_API_KEY};
use payroll_devnet::state::AppState;
use payroll_devnet::{api, db};
use std::time::Duration;

const COMPANY: Address = Address([0x11; 20]);
const OUTSIDER: Address = Address([0x22; 20]);
const ALICE: Address = Address([0xa1; 20]);
const BOB: Address = Address([0xb0; 20]);

type HttpService = PayrollService<DevnetClient, DevnetClient, DevWallet>;

/// Serve a fresh in-memory devnet on an ephemeral port and return its base url.
async fn spawn_devnet() -> (String, DevnetConfig) {
    let config = DevnetConfig::from_lookup(|_| None).unwrap();
    let db = db::connect_in_memory().await.unwrap();
    db::init_schema(&db).await.unwrap();
    let state = AppState::new(db, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(state)).await.unwrap();
    });
    (format!("http://{addr}"), config)
}

fn service(url: &str, devnet: &DevnetConfig) -> (HttpService, DevnetClient) {
    let config = PayrollConfig {
        chain_id: devnet.chain_id,
        contract_address: devnet.contract,
        confirmation_timeout: Duration::from_secs(5),
        devnet_url: url.to_string(),
        api_key: Some(DEFAULT_API_KEY.to_string()),
        ..PayrollConfig::default()
    };
    let client = DevnetClient::from_config(&config);
    let wallet = DevWallet::new(devnet.chain_id, vec![COMPANY, OUTSIDER]).unwrap();
    (PayrollService::new(&config, client.clone(), client.clone(), wallet), client)
}

fn terms(base_salary: u64, kpi_score: u8, tasks_completed: u32, total_tasks: u32) -> SalaryTerms {
    SalaryTerms {
        base_salary,
        kpi_score,
        tasks_completed,
        total_tasks,
        due_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
    }
}

#[tokio::test]
async fn payroll_cycle_over_http() {
    let (url, devnet) = spawn_devnet().await;
    let (service, client) = service(&url, &devnet);

    let network = client.network().await.unwrap();
    assert_eq!(network.chain_id, devnet.chain_id);
    assert_eq!(network.contract, devnet.contract);

    service.register_company("Acme").await.unwrap();
    service.add_employee(ALICE, terms(8000, 92, 18, 20)).await.unwrap();
    client.fund(COMPANY, 20_000).await.unwrap();

    let receipt = service.pay_salary(COMPANY, ALICE).await.unwrap();
    assert_eq!(service.plan(&COMPANY, &ALICE).unwrap().status, PaymentStatus::Paid);
    assert_eq!(client.balance(ALICE).await.unwrap(), 8916);
    assert_eq!(client.balance(COMPANY).await.unwrap(), 20_000 - 8916);

    let err = service.pay_salary(COMPANY, ALICE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyPaid);
    assert_eq!(client.balance(ALICE).await.unwrap(), 8916);

    // The ledger's view agrees with the cache.
    let settled = service.refresh_company(COMPANY).await.unwrap();
    assert!(settled.is_empty());
    let snapshot = service.snapshot();
    assert_eq!(snapshot.company(&COMPANY).unwrap().employee_count, 1);
    assert_eq!(
        snapshot.employee(&COMPANY, &ALICE).unwrap().last_payment_date,
        Some(receipt.timestamp)
    );
}

#[tokio::test]
async fn overlapping_payments_over_http_settle_once() {
    let (url, devnet) = spawn_devnet().await;
    let (service, client) = service(&url, &devnet);

    service.register_company("Acme").await.unwrap();
    service.add_employee(ALICE, terms(8000, 92, 18, 20)).await.unwrap();
    client.fund(COMPANY, 100_000).await.unwrap();

    let (first, second) = tokio::join!(service.pay_salary(COMPANY, ALICE), service.pay_salary(COMPANY, ALICE));
    let kinds = [&first, &second].map(|r| r.as_ref().err().map(|e| e.kind()));
    assert_eq!(kinds.iter().filter(|k| k.is_none()).count(), 1, "{first:?} / {second:?}");
    assert!(kinds.contains(&Some(ErrorKind::PaymentInProgress)), "{first:?} / {second:?}");

    assert_eq!(client.balance(ALICE).await.unwrap(), 8916);
    assert_eq!(client.balance(COMPANY).await.unwrap(), 100_000 - 8916);

    // Another process paying the same period is stopped by the program.
    let due = terms(8000, 92, 18, 20).due_date;
    let err = service.client().pay_salary(COMPANY, ALICE, due, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyPaid);
    assert_eq!(client.balance(ALICE).await.unwrap(), 8916);
}

#[tokio::test]
async fn encrypted_read_views_feed_the_refresh() {
    let (url, devnet) = spawn_devnet().await;
    let (service, client) = service(&url, &devnet);

    service.register_company("Acme").await.unwrap();
    let empty = client.company_payroll(COMPANY).await.unwrap().unwrap();
    service.add_employee(ALICE, terms(8000, 92, 18, 20)).await.unwrap();
    let total = client.company_payroll(COMPANY).await.unwrap().unwrap();
    assert_ne!(empty, total);

    let salary = client.employee_salary(COMPANY, ALICE).await.unwrap();
    assert!(salary.is_some());
    assert_eq!(client.employee_salary(COMPANY, BOB).await.unwrap(), None);
    assert_eq!(client.company_payroll(OUTSIDER).await.unwrap(), None);

    // A second process rebuilds its cache from the ledger.
    let (other, _) = self::service(&url, &devnet);
    other.refresh_company(COMPANY).await.unwrap();
    let snapshot = other.snapshot();
    assert_eq!(snapshot.company(&COMPANY).unwrap().total_payroll, Some(total));
    assert_eq!(snapshot.employee(&COMPANY, &ALICE).unwrap().base_salary, salary);
}

#[tokio::test]
async fn reverts_come_back_as_typed_errors() {
    let (url, devnet) = spawn_devnet().await;
    let (service, client) = service(&url, &devnet);

    service.register_company("Acme").await.unwrap();
    service.add_employee(ALICE, terms(8000, 92, 18, 20)).await.unwrap();
    service.add_employee(BOB, terms(5000, 100, 0, 0)).await.unwrap();

    let err = service.pay_salary(COMPANY, BOB).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

    client.fund(COMPANY, 100_000).await.unwrap();
    service.deactivate_employee(ALICE).await.unwrap();
    let err = service.pay_salary(COMPANY, ALICE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionReverted);
    assert!(err.to_string().contains("employee inactive"), "{err}");
    assert_eq!(service.plan(&COMPANY, &ALICE).unwrap().status, PaymentStatus::Pending);

    // The failed attempts left funds alone.
    assert_eq!(client.balance(COMPANY).await.unwrap(), 100_000);
    service.pay_salary(COMPANY, BOB).await.unwrap();
    assert_eq!(client.balance(BOB).await.unwrap(), 5500);

    let err = service.register_company("Acme II").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionReverted);
}

#[tokio::test]
async fn mutating_routes_need_the_api_key() {
    let (url, devnet) = spawn_devnet().await;
    let anonymous = DevnetClient::new(url.clone(), None);

    assert_eq!(anonymous.network().await.unwrap().chain_id, devnet.chain_id);
    let err = anonymous.fund(COMPANY, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let wrong = DevnetClient::new(url, Some("nope".to_string()));
    let err = wrong.fund(COMPANY, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn relayer_rejects_values_wider_than_declared() {
    let (url, devnet) = spawn_devnet().await;
    let (_service, client) = service(&url, &devnet);

    let err = client
        .encrypt(EncryptRequest {
            contract: devnet.contract,
            submitter: COMPANY,
            values: vec![PlainValue { width: BitWidth::U8, value: 300 }],
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAmount);

    let ok = client
        .encrypt(EncryptRequest {
            contract: devnet.contract,
            submitter: COMPANY,
            values: vec![
                PlainValue { width: BitWidth::U64, value: 1 },
                PlainValue { width: BitWidth::U8, value: 255 },
            ],
        })
        .await
        .unwrap();
    assert_eq!(ok.handles.len(), 2);
    assert_ne!(ok.handles[0], ok.handles[1]);
}

#[tokio::test]
async fn unknown_reads_are_absent_not_errors() {
    let (url, devnet) = spawn_devnet().await;
    let (service, client) = service(&url, &devnet);

    let err = service.refresh_company(COMPANY).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(client.balance(ALICE).await.unwrap(), 0);
}
