//! Integer and rational helpers shared by the scheduler, the exporters and phase math.
//!
//! The live engine, the MIDI exporter and any visual consumer must agree bit-for-bit on how
//! a slot rate maps to a fraction, so they all go through [`approximate_rational`].

// -------------------------------------------------------------------------------------------------

/// Greatest common divisor. `gcd(0, n)` is `n`.
pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

/// Least common multiple. Zero when either argument is zero.
pub fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        0
    } else {
        (a / gcd(a, b)) * b
    }
}

/// Reduce a fraction by its GCD. Fractions with a zero term are passed through.
pub fn reduced(num: i64, den: i64) -> (i64, i64) {
    let g = gcd(num, den);
    if g == 0 {
        (num, den)
    } else {
        (num / g, den / g)
    }
}

// -------------------------------------------------------------------------------------------------

/// Approximate a positive real value as a fraction `num/den` with `den <= max_den`, using the
/// standard continued-fraction expansion.
///
/// Expansion terminates early when the next convergent's denominator would exceed `max_den` or
/// the fractional remainder falls below 1e-12. When the integer part alone exceeds `max_den`
/// the result is simply `(floor(x), 1)`.
///
/// The returned fraction is a convergent and thus not necessarily reduced; callers which need
/// a canonical fraction should pass the result through [`reduced`].
pub fn approximate_rational(x: f64, max_den: i64) -> (i64, i64) {
    let a0 = x.floor() as i64;
    if a0 > max_den {
        return (a0, 1);
    }

    let (mut n0, mut d0, mut n1, mut d1) = (1_i64, 0_i64, a0, 1_i64);
    let mut frac = x - a0 as f64;
    while frac > 1e-12 && d1 <= max_den {
        let inv = 1.0 / frac;
        let ai = inv.floor() as i64;
        let n2 = n0 + ai * n1;
        let d2 = d0 + ai * d1;
        if d2 > max_den {
            break;
        }
        n0 = n1;
        d0 = d1;
        n1 = n2;
        d1 = d2;
        frac = inv - ai as f64;
    }
    (n1, d1)
}

// -------------------------------------------------------------------------------------------------
