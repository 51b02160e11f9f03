use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use levy_billing::{
    Association, BillingKind, BillingTerms, FeeSchedule, InvoiceId, OverpaymentPolicy, Owner, PaymentType, Property,
};
use levy_core::{OwnerId, PropertyId};
use levy_infra::services::NewPayment;
use levy_infra::{BillingConfig, BillingServices};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Services with `properties` billed at 1200.00 each; overpayment allowed so
/// payments can be registered indefinitely.
fn setup(properties: u32) -> (BillingServices, Vec<InvoiceId>) {
    let services = BillingServices::new(BillingConfig {
        overpayment: OverpaymentPolicy::Allow,
        ..BillingConfig::default()
    });
    services
        .update_association(Association {
            name: "Bench förening".to_string(),
            ..Association::default()
        })
        .unwrap();
    for number in 1..=properties {
        let owner = services
            .add_owner(Owner {
                owner_id: OwnerId::new(),
                name: format!("Owner {number}"),
                email: Some(format!("owner{number}@example.org")),
                phone: None,
            })
            .unwrap();
        services
            .add_property(Property {
                property_id: PropertyId::new(),
                number,
                designation: format!("Bench 1:{number}"),
                share_ratio: Decimal::ONE,
                address: None,
                owner_id: owner.owner_id,
                active: true,
            })
            .unwrap();
    }
    let billing = services
        .create_billing(
            BillingTerms {
                year: 2024,
                period: 1,
                kind: BillingKind::AnnualFee,
                description: "Årsavgift".to_string(),
                fee: FeeSchedule::Flat { amount: Decimal::new(120000, 2) },
                issue_date: date(2024, 1, 2),
                due_date: date(2024, 2, 1),
            },
            true,
        )
        .unwrap();
    (services, billing.invoice_ids)
}

fn payment() -> NewPayment {
    NewPayment {
        amount: black_box(Decimal::new(1000, 2)),
        payment_type: PaymentType::Bankgiro,
        payment_date: date(2024, 1, 20),
        reference: None,
    }
}

fn bench_register_payment(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_payment");

    for history in [0usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("with_prior_payments", history), &history, |b, &history| {
            let (services, invoices) = setup(1);
            for _ in 0..history {
                services.register_payment(invoices[0], payment()).unwrap();
            }
            b.iter(|| services.register_payment(invoices[0], payment()).unwrap());
        });
    }

    group.finish();
}

fn bench_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_invoices");
    group.sample_size(20);

    for properties in [10u32, 100, 500] {
        group.throughput(Throughput::Elements(properties as u64));
        group.bench_with_input(BenchmarkId::new("properties", properties), &properties, |b, &properties| {
            b.iter(|| setup(black_box(properties)));
        });
    }

    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");

    for properties in [10u32, 100, 1000] {
        let (services, invoices) = setup(properties);
        for invoice_id in &invoices {
            services.register_payment(*invoice_id, payment()).unwrap();
        }
        group.throughput(Throughput::Elements(invoices.len() as u64 * 2));
        group.bench_with_input(BenchmarkId::new("invoices", properties), &services, |b, services| {
            b.iter(|| services.rebuild_projections().unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_register_payment, bench_generation, bench_projection_rebuild);
criterion_main!(benches);
