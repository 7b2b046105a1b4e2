use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Simulation time in model steps. Totally ordered, so it can key the
/// event heap directly.
pub type SimTime = Fixed64;

/// Convert a sampled duration or timestamp to [`SimTime`].
///
/// Saturates at the representable range; NaN and negative inputs map to zero
/// so a misbehaving distribution can never move the clock backwards.
#[inline]
pub fn to_time(v: f64) -> SimTime {
    if v.is_nan() || v <= 0.0 {
        return SimTime::ZERO;
    }
    SimTime::saturating_from_num(v)
}

/// Convert a [`SimTime`] to f64 for statistics and display.
#[inline]
pub fn time_to_f64(t: SimTime) -> f64 {
    t.to_num::<f64>()
}

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}
