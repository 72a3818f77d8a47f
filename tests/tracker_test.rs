use chrono::{DateTime, Duration, TimeZone, Utc};
use smartev::tracker::CalendarHourTracker;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap()
}

/// Feed `power(t)` every `step_s` seconds for `span_s` seconds from the hour start
fn integrate(step_s: i64, span_s: i64, power: impl Fn(i64) -> f64) -> f64 {
    let mut tracker = CalendarHourTracker::new();
    let mut t = 0;
    while t <= span_s {
        tracker.record(power(t), base() + Duration::seconds(t));
        t += step_s;
    }
    tracker.energy_wh_so_far()
}

#[test]
fn constant_power_is_independent_of_sampling_rate() {
    let fine = integrate(1, 1800, |_| 7200.0);
    let coarse = integrate(60, 1800, |_| 7200.0);
    assert!((fine - 3600.0).abs() < 1e-6);
    assert!((coarse - 3600.0).abs() < 1e-6);
}

#[test]
fn finer_sampling_converges_on_the_integral() {
    // p(t) = 4 t W over 1800 s integrates to 1800 Wh
    let exact = 4.0 * 1800.0_f64.powi(2) / 2.0 / 3600.0;
    let ramp = |t: i64| 4.0 * t as f64;

    let coarse_err = (integrate(60, 1800, ramp) - exact).abs() / exact;
    let medium_err = (integrate(10, 1800, ramp) - exact).abs() / exact;
    let fine_err = (integrate(1, 1800, ramp) - exact).abs() / exact;

    assert!(coarse_err > medium_err);
    assert!(medium_err > fine_err);
    assert!(fine_err < 1e-3);
}

#[test]
fn no_energy_carries_over_the_hour_boundary() {
    let mut tracker = CalendarHourTracker::new();
    let before = Utc.with_ymd_and_hms(2026, 2, 3, 10, 59, 59).unwrap();
    let after = Utc.with_ymd_and_hms(2026, 2, 3, 11, 0, 1).unwrap();

    tracker.record(9000.0, before - Duration::seconds(60));
    tracker.record(9000.0, before);
    assert!(tracker.energy_wh_so_far() > 100.0);

    tracker.record(9000.0, after);
    assert_eq!(
        tracker.hour_start(),
        Some(Utc.with_ymd_and_hms(2026, 2, 3, 11, 0, 0).unwrap())
    );
    // Only the second after 11:00:00 counts
    assert!((tracker.energy_wh_so_far() - 2.5).abs() < 1e-9);
}

#[test]
fn headroom_keeps_full_hour_average_at_limit() {
    let mut tracker = CalendarHourTracker::new();
    let start = base();
    tracker.record(0.0, start);
    // 15 minutes at 8 kW uses 2 kWh of an 11 kWh hour
    let quarter = start + Duration::minutes(15);
    let headroom = tracker.update(8000.0, quarter, 11.0);
    assert!((headroom - 12.0).abs() < 1e-9);

    // Drawing the headroom for the rest of the hour lands exactly on the limit
    let end = start + Duration::minutes(59) + Duration::seconds(59);
    tracker.record(headroom * 1000.0, end);
    assert!(tracker.average_kw_so_far(end) <= 11.0 + 1e-6);
}
