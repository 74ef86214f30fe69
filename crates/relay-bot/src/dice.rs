use rand::Rng;

/// Source of randomness for probabilistic stages. Injected so tests can fix
/// the outcome.
pub trait Dice: Send + Sync {
    /// `true` with probability `percent / 100`.
    fn chance(&self, percent: u8) -> bool;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&self, len: usize) -> usize;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomDice;

impl Dice for RandomDice {
    fn chance(&self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        rand::thread_rng().gen_range(0..100u8) < percent
    }

    fn pick(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_full_probability() {
        let dice = RandomDice;
        assert!((0..200).all(|_| !dice.chance(0)));
        assert!((0..200).all(|_| dice.chance(100)));
    }

    #[test]
    fn pick_stays_in_range() {
        let dice = RandomDice;
        assert_eq!(dice.pick(0), 0);
        assert_eq!(dice.pick(1), 0);
        assert!((0..200).all(|_| dice.pick(3) < 3));
    }
}
