use chrono::{DateTime, Duration};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use travel_booking_core::{FilterSpec, Offer, Price, Segment, SortKey, StopFilter};

const CARRIERS: [&str; 6] = ["6E", "AI", "UK", "SG", "QP", "IX"];

fn random_offers(count: usize) -> Vec<Offer> {
    let mut rng = thread_rng();
    let day = DateTime::parse_from_rfc3339("2025-06-01T00:00:00+05:30")
        .expect("valid benchmark date");

    (0..count)
        .map(|i| {
            let legs = rng.gen_range(1..=3);
            let mut departure = day + Duration::minutes(rng.gen_range(0..20 * 60));
            let segments = (0..legs)
                .map(|_| {
                    let arrival = departure + Duration::minutes(rng.gen_range(60..240));
                    let segment = Segment {
                        origin: "DEL".to_string(),
                        destination: "BOM".to_string(),
                        departure: Some(departure),
                        arrival: Some(arrival),
                        flight_number: None,
                    };
                    departure = arrival + Duration::minutes(rng.gen_range(45..180));
                    segment
                })
                .collect();

            let carrier = CARRIERS.choose(&mut rng).copied().unwrap_or("6E");
            Offer::flight(format!("F{i}"), carrier, Price::new(rng.gen_range(2500.0..15000.0), "INR"))
                .with_segments(segments)
                .refundable(rng.gen_bool(0.4))
        })
        .collect()
}

pub fn filter_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("results_filter_sort");

    let spec = FilterSpec::default()
        .with_carriers(["6E", "AI", "UK"])
        .with_stops(StopFilter::Nonstop)
        .with_departure_hours(6, 22)
        .and_then(|s| s.with_price(Some(3000.0), Some(12000.0)))
        .map(|s| s.with_sort(SortKey::PriceAsc))
        .unwrap_or_default();

    for size in [50, 200, 1000].iter() {
        let offers = random_offers(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &offers, |b, offers| {
            b.iter(|| black_box(spec.apply(black_box(offers))))
        });
    }

    group.finish();
}

criterion_group!(benches, filter_benchmark);
criterion_main!(benches);
