use rand::Rng;
use std::ops::Range;
#[cfg(test)] use std::sync::Mutex;


#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

/// Source of randomness for simulated values. Static methods keep the generic parameter
///  zero-sized; tests substitute `MockRandom` to make walks deterministic.
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    fn gen_f64_range(range: Range<f64>) -> f64;
    fn gen_bool() -> bool;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_f64_range(range: Range<f64>) -> f64 {
        rand::rng().random_range(range)
    }

    fn gen_bool() -> bool {
        rand::rng().random_bool(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_random_stays_in_range() {
        for _ in 0..1000 {
            let value = RngRandom::gen_f64_range(-2.5..7.0);
            assert!((-2.5..7.0).contains(&value), "{}", value);
        }
        let heads = (0..1000).filter(|_| RngRandom::gen_bool()).count();
        assert!(heads > 0 && heads < 1000);
    }
}
