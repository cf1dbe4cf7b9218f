//! Stock engine tests against PostgreSQL
//!
//! Each test gets a fresh database with the embedded migrations applied.
//! They need DATABASE_URL and are ignored by default:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/stock_engine cargo test -- --ignored
//! ```

use rust_decimal::Decimal;
use shared::{Reference, ReferenceType, StockState};
use sqlx::PgPool;
use std::str::FromStr;
use stock_engine::services::hooks::HookDispatcher;
use stock_engine::services::{
    AddStockInput, AdjustStockInput, RemoveStockInput, ReservationInput, TransferStockInput,
};
use stock_engine::store::NewProduct;
use stock_engine::{Engine, ErrorKind, SchemaCapabilities};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

struct Fixture {
    engine: Engine,
    business_id: Uuid,
    product_id: Uuid,
}

async fn setup(pool: PgPool) -> Fixture {
    let engine = Engine::new(pool, SchemaCapabilities::full(), HookDispatcher::disabled(), 5000);
    let business_id = Uuid::new_v4();
    let product = engine
        .stock()
        .create_product(
            business_id,
            NewProduct {
                sku: "SKU-1".to_string(),
                name: "Widget".to_string(),
                base_unit: "each".to_string(),
                unit_conversions: [("case".to_string(), dec("12"))].into_iter().collect(),
                reorder_level: Some(dec("2")),
                reorder_quantity: Some(dec("20")),
            },
        )
        .await
        .unwrap();

    Fixture {
        engine,
        business_id,
        product_id: product.id,
    }
}

fn purchase(f: &Fixture, quantity: &str, cost: &str) -> AddStockInput {
    AddStockInput {
        business_id: f.business_id,
        product_id: f.product_id,
        warehouse_id: None,
        state: StockState::Sellable,
        quantity: dec(quantity),
        unit_cost: dec(cost),
        unit: None,
        batch_number: None,
        serials: vec![],
        manufacturing_date: None,
        expiry_date: None,
        reference: Reference::new(ReferenceType::Purchase, Uuid::new_v4()),
        notes: None,
    }
}

fn sale(f: &Fixture, quantity: &str) -> RemoveStockInput {
    RemoveStockInput {
        business_id: f.business_id,
        product_id: f.product_id,
        warehouse_id: None,
        state: StockState::Sellable,
        quantity: dec(quantity),
        batch_id: None,
        serials: vec![],
        reference: Reference::new(ReferenceType::Sale, Uuid::new_v4()),
        notes: None,
    }
}

fn adjustment(f: &Fixture, change: &str) -> AdjustStockInput {
    AdjustStockInput {
        business_id: f.business_id,
        product_id: f.product_id,
        warehouse_id: None,
        state: StockState::Sellable,
        quantity_change: dec(change),
        serials: vec![],
        reason: "cycle count".to_string(),
    }
}

async fn count(pool: &PgPool, table: &str, product_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE product_id = $1"))
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn serial_row(pool: &PgPool, number: &str) -> (String, Option<Uuid>) {
    sqlx::query_as("SELECT status, warehouse_id FROM serials WHERE serial_number = $1")
        .bind(number)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn numbers(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}

async fn gl_totals(pool: &PgPool, business_id: Uuid) -> (Decimal, Decimal) {
    sqlx::query_as(
        "SELECT COALESCE(SUM(debit), 0), COALESCE(SUM(credit), 0) FROM gl_entries WHERE business_id = $1",
    )
    .bind(business_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

// ============================================================================
// Add / Remove
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn add_then_remove_returns_to_zero(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    let added = stock.add(purchase(&f, "8", "25")).await.unwrap();
    assert_eq!(added.new_stock, dec("8"));
    assert_eq!(added.new_cost_price, dec("25"));

    let removed = stock.remove(sale(&f, "8")).await.unwrap();
    assert_eq!(removed.new_stock, Decimal::ZERO);
    assert_eq!(removed.cost_of_goods_sold, dec("200"));

    let movements = stock.movements(f.business_id, f.product_id).await.unwrap();
    assert_eq!(movements.len(), 2);
    let net: Decimal = movements.iter().map(|m| m.quantity_change).sum();
    assert_eq!(net, Decimal::ZERO);

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    let located: Decimal = snapshot.locations.iter().map(|l| l.quantity).sum();
    assert_eq!(located, snapshot.product.stock);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn two_receipts_average_their_cost(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    stock.add(purchase(&f, "10", "100")).await.unwrap();
    let second = stock.add(purchase(&f, "30", "60")).await.unwrap();

    // (10*100 + 30*60) / 40
    assert_eq!(second.new_stock, dec("40"));
    assert_eq!(second.new_cost_price, dec("70"));

    let ledger = stock.ledger(f.business_id, f.product_id).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[1].balance_quantity, dec("40"));
    assert_eq!(ledger[1].balance_value, dec("2800"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn entry_unit_is_converted_to_base(pool: PgPool) {
    let f = setup(pool).await;
    let mut input = purchase(&f, "2", "60");
    input.unit = Some("case".to_string());

    let added = f.engine.stock().add(input).await.unwrap();
    assert_eq!(added.new_stock, dec("24"));
    assert_eq!(added.new_cost_price, dec("5"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn remove_beyond_scoped_location_reports_available(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let added = stock.add(purchase(&f, "5", "10")).await.unwrap();

    let mut input = sale(&f, "6");
    input.warehouse_id = Some(added.warehouse_id);
    let err = stock.remove(input.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    let failure = stock_engine::Failure::from(&err);
    assert_eq!(failure.available, Some(dec("5")));
    assert_eq!(failure.requested, Some(dec("6")));

    // Nothing sellable in the damaged bucket
    input.quantity = dec("1");
    input.state = StockState::Damaged;
    let err = stock.remove(input).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    assert_eq!(count(&f.engine.db, "stock_movements", f.product_id).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn fefo_drains_earliest_expiry_first(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    let mut late = purchase(&f, "5", "12");
    late.batch_number = Some("B2".to_string());
    late.expiry_date = chrono::NaiveDate::from_ymd_opt(2031, 6, 1);
    let b2 = stock.add(late).await.unwrap().batch_id.unwrap();

    let mut early = purchase(&f, "5", "10");
    early.batch_number = Some("B1".to_string());
    early.expiry_date = chrono::NaiveDate::from_ymd_opt(2031, 1, 1);
    let b1 = stock.add(early).await.unwrap().batch_id.unwrap();

    let removed = stock.remove(sale(&f, "7")).await.unwrap();
    assert_eq!(removed.draws.len(), 2);
    assert_eq!(removed.draws[0].batch_id, b1);
    assert_eq!(removed.draws[0].quantity, dec("5"));
    assert_eq!(removed.draws[1].batch_id, b2);
    assert_eq!(removed.draws[1].quantity, dec("2"));
    assert_eq!(removed.cost_of_goods_sold, dec("74"));

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    let remaining: Vec<(Uuid, Decimal)> = snapshot.batches.iter().map(|b| (b.id, b.quantity)).collect();
    assert!(remaining.contains(&(b1, Decimal::ZERO)));
    assert!(remaining.contains(&(b2, dec("3"))));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn explicit_batch_does_not_spill(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    let mut first = purchase(&f, "3", "10");
    first.batch_number = Some("LOT-A".to_string());
    let lot_a = stock.add(first).await.unwrap().batch_id.unwrap();
    let mut second = purchase(&f, "10", "10");
    second.batch_number = Some("LOT-B".to_string());
    stock.add(second).await.unwrap();

    let mut input = sale(&f, "4");
    input.batch_id = Some(lot_a);
    let err = stock.remove(input).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("13"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn unscoped_remove_draws_batches_where_it_decrements(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let w1 = stock.create_warehouse(f.business_id, "W1", "North", true).await.unwrap();
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();

    let mut loose = purchase(&f, "5", "10");
    loose.warehouse_id = Some(w1.id);
    stock.add(loose).await.unwrap();
    let mut lot = purchase(&f, "5", "20");
    lot.warehouse_id = Some(w2.id);
    lot.batch_number = Some("B2".to_string());
    let b2 = stock.add(lot).await.unwrap().batch_id.unwrap();

    // Primary warehouse holds no batch, so the draw is costed at the average
    let removed = assert_ok!(stock.remove(sale(&f, "5")).await);
    assert_eq!(removed.warehouse_id, w1.id);
    assert!(removed.draws.is_empty());
    assert_eq!(removed.cost_of_goods_sold, dec("75"));

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    let batch = snapshot.batches.iter().find(|b| b.id == b2).unwrap();
    assert_eq!(batch.quantity, dec("5"));
    let at = |w: Uuid| {
        snapshot
            .locations
            .iter()
            .find(|l| l.warehouse_id == w)
            .map(|l| l.quantity)
    };
    assert_eq!(at(w1.id), Some(Decimal::ZERO));
    assert_eq!(at(w2.id), Some(dec("5")));

    let mut scoped = sale(&f, "5");
    scoped.warehouse_id = Some(w2.id);
    let removed = assert_ok!(stock.remove(scoped).await);
    assert_eq!(removed.draws.len(), 1);
    assert_eq!(removed.draws[0].batch_id, b2);
    assert_eq!(removed.cost_of_goods_sold, dec("100"));
}

// ============================================================================
// General ledger
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn purchase_posts_inventory_against_payable(pool: PgPool) {
    let f = setup(pool).await;
    let input = purchase(&f, "10", "100");
    let reference = input.reference;
    f.engine.stock().add(input).await.unwrap();

    let accounting = f.engine.accounting();
    let lines = accounting.lines_by_reference(f.business_id, reference).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].debit, dec("1000"));
    assert_eq!(lines[1].credit, dec("1000"));
    assert_eq!(lines[0].posting_id, lines[1].posting_id);

    let trial = accounting.trial_balance(f.business_id).await.unwrap();
    let inventory = trial.iter().find(|r| r.code == "1300").unwrap();
    let payable = trial.iter().find(|r| r.code == "2000").unwrap();
    assert_eq!(inventory.debit, dec("1000"));
    assert_eq!(payable.credit, dec("1000"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn every_mutation_keeps_books_balanced(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    stock.add(purchase(&f, "10", "7.33")).await.unwrap();
    stock.remove(sale(&f, "3")).await.unwrap();
    stock.adjust(adjustment(&f, "-2")).await.unwrap();
    stock.adjust(adjustment(&f, "4")).await.unwrap();

    let (debit, credit) = gl_totals(&f.engine.db, f.business_id).await;
    assert!(debit > Decimal::ZERO);
    assert_eq!(debit, credit);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn posting_failure_rolls_back_stock_in(pool: PgPool) {
    let f = setup(pool).await;

    // A chart with an inventory account but no payable role
    sqlx::query(
        "INSERT INTO accounts (business_id, code, name, account_type, role) \
         VALUES ($1, '1300', 'Inventory Asset', 'asset', 'inventory')",
    )
    .bind(f.business_id)
    .execute(&f.engine.db)
    .await
    .unwrap();

    let err = f.engine.stock().add(purchase(&f, "10", "100")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountingPostingFailed);

    let snapshot = f.engine.stock().snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, Decimal::ZERO);
    assert!(snapshot.locations.is_empty());
    assert_eq!(count(&f.engine.db, "stock_movements", f.product_id).await, 0);
    assert_eq!(count(&f.engine.db, "inventory_ledger", f.product_id).await, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn reversal_nets_reference_to_zero(pool: PgPool) {
    let f = setup(pool).await;
    let input = purchase(&f, "4", "2.50");
    let reference = input.reference;
    f.engine.stock().add(input).await.unwrap();

    let accounting = f.engine.accounting();
    let reversal = accounting
        .reverse(f.business_id, reference, "purchase voided")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reversal.total, dec("10"));

    let lines = accounting.lines_by_reference(f.business_id, reference).await.unwrap();
    assert_eq!(lines.len(), 4);
    let debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let credit: Decimal = lines.iter().map(|l| l.credit).sum();
    assert_eq!(debit, credit);
    assert_eq!(debit, dec("20"));
}

// ============================================================================
// Transfer / Adjust
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn transfer_moves_location_not_aggregate(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let w1 = stock.create_warehouse(f.business_id, "W1", "North", true).await.unwrap();
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();

    let mut input = purchase(&f, "10", "5");
    input.warehouse_id = Some(w1.id);
    stock.add(input).await.unwrap();

    let outcome = stock
        .transfer(TransferStockInput {
            business_id: f.business_id,
            product_id: f.product_id,
            from_warehouse_id: w1.id,
            to_warehouse_id: w2.id,
            state: StockState::Sellable,
            quantity: dec("4"),
            batch_id: None,
            serials: vec![],
            notes: None,
        })
        .await
        .unwrap();

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("10"));
    let at = |w: Uuid| {
        snapshot
            .locations
            .iter()
            .find(|l| l.warehouse_id == w)
            .map(|l| l.quantity)
    };
    assert_eq!(at(w1.id), Some(dec("6")));
    assert_eq!(at(w2.id), Some(dec("4")));

    let reference = Reference::new(ReferenceType::Transfer, outcome.transfer_id);
    let movements = stock.movements_by_reference(f.business_id, reference).await.unwrap();
    let kinds: Vec<&str> = movements.iter().map(|m| m.movement_type.as_str()).collect();
    assert_eq!(kinds, vec!["transfer_out", "transfer_in"]);

    let lines = f.engine.accounting().lines_by_reference(f.business_id, reference).await.unwrap();
    assert!(lines.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn batch_transfer_relocates_whole_batch(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let w1 = stock.create_warehouse(f.business_id, "W1", "North", true).await.unwrap();
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();

    let mut input = purchase(&f, "6", "5");
    input.warehouse_id = Some(w1.id);
    input.batch_number = Some("LOT-9".to_string());
    let batch_id = stock.add(input).await.unwrap().batch_id.unwrap();

    let mut transfer = TransferStockInput {
        business_id: f.business_id,
        product_id: f.product_id,
        from_warehouse_id: w1.id,
        to_warehouse_id: w2.id,
        state: StockState::Sellable,
        quantity: dec("4"),
        batch_id: Some(batch_id),
        serials: vec![],
        notes: None,
    };
    let err = stock.transfer(transfer.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    transfer.quantity = dec("6");
    stock.transfer(transfer).await.unwrap();

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.batches[0].warehouse_id, w2.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn adjust_below_zero_writes_nothing(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    stock.add(purchase(&f, "3", "10")).await.unwrap();

    let err = stock.adjust(adjustment(&f, "-4")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("3"));
    assert_eq!(count(&f.engine.db, "stock_movements", f.product_id).await, 1);
    assert_eq!(count(&f.engine.db, "inventory_ledger", f.product_id).await, 1);
    let (debit, _) = gl_totals(&f.engine.db, f.business_id).await;
    assert_eq!(debit, dec("30"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn negative_adjust_consumes_batches_and_clamps_holds(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let mut input = purchase(&f, "5", "10");
    input.batch_number = Some("B1".to_string());
    let b1 = stock.add(input).await.unwrap().batch_id.unwrap();

    let reservations = f.engine.reservations();
    let hold = |quantity: &str| ReservationInput {
        business_id: f.business_id,
        product_id: f.product_id,
        quantity: dec(quantity),
        batch_id: Some(b1),
    };
    assert_ok!(reservations.reserve(hold("2")).await);

    let adjusted = assert_ok!(stock.adjust(adjustment(&f, "-4")).await);
    assert_eq!(adjusted.new_stock, dec("1"));

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.batches[0].quantity, dec("1"));
    assert_eq!(snapshot.batches[0].reserved_quantity, dec("1"));

    let reference = Reference::new(ReferenceType::Adjustment, adjusted.adjustment_id);
    let movements = stock.movements_by_reference(f.business_id, reference).await.unwrap();
    assert_eq!(movements[0].batch_id, Some(b1));

    // Nothing left to hold once the write-off is applied
    let err = assert_err!(reservations.reserve(hold("1")).await);
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    assert_ok!(stock.adjust(adjustment(&f, "-1")).await);
    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, Decimal::ZERO);
    assert_eq!(snapshot.batches[0].quantity, Decimal::ZERO);
    assert_eq!(snapshot.batches[0].reserved_quantity, Decimal::ZERO);
}

// ============================================================================
// Serials
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn sold_serial_comes_back_as_returned(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let serials = vec!["SN-1".to_string(), "SN-2".to_string()];

    let mut input = purchase(&f, "2", "50");
    input.serials = serials.clone();
    stock.add(input).await.unwrap();

    let mut out = sale(&f, "1");
    out.serials = vec!["SN-1".to_string()];
    stock.remove(out.clone()).await.unwrap();

    // Already sold
    let err = stock.remove(out).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let mut back = purchase(&f, "1", "50");
    back.reference = Reference::new(ReferenceType::SalesReturn, Uuid::new_v4());
    back.serials = vec!["SN-1".to_string()];
    stock.add(back).await.unwrap();

    let status: String = sqlx::query_scalar("SELECT status FROM serials WHERE serial_number = 'SN-1'")
        .fetch_one(&f.engine.db)
        .await
        .unwrap();
    assert_eq!(status, "returned");

    // Serial count must match the quantity
    let mut mismatched = purchase(&f, "2", "50");
    mismatched.serials = vec!["SN-3".to_string()];
    let err = stock.add(mismatched).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn serial_transfer_moves_exactly_the_named_units(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let w1 = stock.create_warehouse(f.business_id, "W1", "North", true).await.unwrap();
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();

    let mut input = purchase(&f, "3", "40");
    input.warehouse_id = Some(w1.id);
    input.serials = numbers(&["SN-A", "SN-B", "SN-C"]);
    stock.add(input).await.unwrap();

    let mut transfer = TransferStockInput {
        business_id: f.business_id,
        product_id: f.product_id,
        from_warehouse_id: w1.id,
        to_warehouse_id: w2.id,
        state: StockState::Sellable,
        quantity: dec("2"),
        batch_id: None,
        serials: numbers(&["SN-A"]),
        notes: None,
    };
    let err = assert_err!(stock.transfer(transfer.clone()).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    transfer.serials = numbers(&["SN-A", "SN-B"]);
    assert_ok!(stock.transfer(transfer.clone()).await);
    assert_eq!(serial_row(&f.engine.db, "SN-A").await.1, Some(w2.id));
    assert_eq!(serial_row(&f.engine.db, "SN-B").await.1, Some(w2.id));
    assert_eq!(serial_row(&f.engine.db, "SN-C").await.1, Some(w1.id));

    // SN-A is no longer at the source
    transfer.quantity = dec("1");
    transfer.serials = numbers(&["SN-A"]);
    let err = assert_err!(stock.transfer(transfer).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    let at_w1 = snapshot.locations.iter().find(|l| l.warehouse_id == w1.id).map(|l| l.quantity);
    assert_eq!(at_w1, Some(dec("1")));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn serial_remove_checks_count_and_warehouse(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();
    let w1 = stock.create_warehouse(f.business_id, "W1", "North", true).await.unwrap();
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();

    let mut lot = purchase(&f, "2", "40");
    lot.warehouse_id = Some(w1.id);
    lot.batch_number = Some("SB-1".to_string());
    lot.serials = numbers(&["S-1", "S-2"]);
    let batch_id = stock.add(lot).await.unwrap().batch_id.unwrap();
    let mut elsewhere = purchase(&f, "1", "40");
    elsewhere.warehouse_id = Some(w2.id);
    elsewhere.serials = numbers(&["S-3"]);
    stock.add(elsewhere).await.unwrap();

    let mut short = sale(&f, "2");
    short.warehouse_id = Some(w1.id);
    short.serials = numbers(&["S-1"]);
    let err = assert_err!(stock.remove(short).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let mut wrong_place = sale(&f, "1");
    wrong_place.warehouse_id = Some(w1.id);
    wrong_place.serials = numbers(&["S-3"]);
    let err = assert_err!(stock.remove(wrong_place).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(serial_row(&f.engine.db, "S-3").await.0, "available");

    let mut exact = sale(&f, "2");
    exact.warehouse_id = Some(w1.id);
    exact.serials = numbers(&["S-1", "S-2"]);
    let removed = assert_ok!(stock.remove(exact).await);
    assert_eq!(removed.draws.len(), 1);
    assert_eq!(removed.draws[0].batch_id, batch_id);
    assert_eq!(removed.cost_of_goods_sold, dec("80"));
    assert_eq!(serial_row(&f.engine.db, "S-1").await.0, "sold");
    assert_eq!(serial_row(&f.engine.db, "S-2").await.0, "sold");

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("1"));
    let batch = snapshot.batches.iter().find(|b| b.id == batch_id).unwrap();
    assert_eq!(batch.quantity, Decimal::ZERO);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn negative_adjust_writes_off_named_serials(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    let mut input = purchase(&f, "3", "25");
    input.serials = numbers(&["J-1", "J-2", "J-3"]);
    let primary = stock.add(input).await.unwrap().warehouse_id;
    let w2 = stock.create_warehouse(f.business_id, "W2", "South", false).await.unwrap();
    let mut elsewhere = purchase(&f, "1", "25");
    elsewhere.warehouse_id = Some(w2.id);
    elsewhere.serials = numbers(&["J-4"]);
    stock.add(elsewhere).await.unwrap();

    let mut mismatched = adjustment(&f, "-2");
    mismatched.serials = numbers(&["J-1"]);
    let err = assert_err!(stock.adjust(mismatched).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let mut wrong_place = adjustment(&f, "-1");
    wrong_place.serials = numbers(&["J-4"]);
    let err = assert_err!(stock.adjust(wrong_place).await);
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(serial_row(&f.engine.db, "J-4").await.0, "available");

    let mut write_off = adjustment(&f, "-2");
    write_off.serials = numbers(&["J-1", "J-2"]);
    let adjusted = assert_ok!(stock.adjust(write_off).await);
    assert_eq!(adjusted.warehouse_id, primary);
    assert_eq!(adjusted.new_stock, dec("2"));
    assert_eq!(serial_row(&f.engine.db, "J-1").await.0, "sold");
    assert_eq!(serial_row(&f.engine.db, "J-2").await.0, "sold");
    assert_eq!(serial_row(&f.engine.db, "J-3").await.0, "available");
}

// ============================================================================
// Reservations
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn reservations_hold_and_release(pool: PgPool) {
    let f = setup(pool).await;
    let mut input = purchase(&f, "10", "1");
    input.batch_number = Some("R-1".to_string());
    let batch_id = f.engine.stock().add(input).await.unwrap().batch_id.unwrap();

    let reservations = f.engine.reservations();
    let hold = |quantity: &str| ReservationInput {
        business_id: f.business_id,
        product_id: f.product_id,
        quantity: dec(quantity),
        batch_id: Some(batch_id),
    };

    let reserved = reservations.reserve(hold("7")).await.unwrap();
    assert!(reserved.ok);
    assert_eq!(reserved.holds[0].reserved_quantity, dec("7"));

    let err = reservations.reserve(hold("4")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    // Over-release floors at zero
    let released = reservations.release(hold("50")).await.unwrap();
    assert_eq!(released.holds[0].reserved_quantity, Decimal::ZERO);

    let snapshot = f.engine.stock().snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("10"));
}

// ============================================================================
// Units of work and concurrency
// ============================================================================

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn composed_primitives_roll_back_together(pool: PgPool) {
    let f = setup(pool).await;
    let stock = f.engine.stock();

    let mut uow = f.engine.begin().await.unwrap();
    stock.add_in(&mut uow, &purchase(&f, "5", "10")).await.unwrap();
    stock.remove_in(&mut uow, &sale(&f, "2")).await.unwrap();
    assert_eq!(uow.pending_events().len(), 2);
    uow.rollback().await.unwrap();

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, Decimal::ZERO);
    assert_eq!(count(&f.engine.db, "stock_movements", f.product_id).await, 0);

    let mut uow = f.engine.begin().await.unwrap();
    stock.add_in(&mut uow, &purchase(&f, "5", "10")).await.unwrap();
    stock.remove_in(&mut uow, &sale(&f, "2")).await.unwrap();
    uow.commit().await.unwrap();

    let snapshot = stock.snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("3"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_removes_never_oversell_a_batch(pool: PgPool) {
    let f = setup(pool).await;
    let mut input = purchase(&f, "10", "3");
    input.batch_number = Some("HOT".to_string());
    let batch_id = f.engine.stock().add(input).await.unwrap().batch_id.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let stock = f.engine.stock();
        let mut input = sale(&f, "6");
        input.batch_id = Some(batch_id);
        tasks.push(tokio::spawn(async move { stock.remove(input).await }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientStock),
        }
    }
    assert_eq!(succeeded, 1);

    let snapshot = f.engine.stock().snapshot(f.business_id, f.product_id).await.unwrap();
    assert_eq!(snapshot.product.stock, dec("4"));
    assert_eq!(snapshot.batches[0].quantity, dec("4"));
}
