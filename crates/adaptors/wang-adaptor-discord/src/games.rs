//! `!gamble` slot machine

use rand::Rng;

/// Reel icons
pub const ICONS: [&str; 9] = ["🍒", "🍋", "🔔", "🍀", "💎", "7️⃣", "🍇", "🎰", "⭐"];

const WIN: &str = "You Won You Lucky Fuck";
const LOSE: &str = "You A Fuckin Lose Dummy";

/// One pull of the lever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spin {
    reels: [usize; 3],
}

impl Spin {
    /// Spin three independent reels
    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            reels: [
                rng.gen_range(0..ICONS.len()),
                rng.gen_range(0..ICONS.len()),
                rng.gen_range(0..ICONS.len()),
            ],
        }
    }

    /// Fixed outcome; indices wrap around the icon set
    pub fn from_reels(reels: [usize; 3]) -> Self {
        Self {
            reels: reels.map(|r| r % ICONS.len()),
        }
    }

    /// All three reels match
    pub fn is_win(&self) -> bool {
        self.reels[0] == self.reels[1] && self.reels[1] == self.reels[2]
    }

    /// Verdict line, shown and spoken
    pub fn verdict(&self) -> &'static str {
        if self.is_win() {
            WIN
        } else {
            LOSE
        }
    }

    /// Reels rendered as ` | 🍒 | 🍋 | 🔔 | `
    pub fn render(&self) -> String {
        let mut out = String::from(" | ");
        for &reel in &self.reels {
            out.push_str(ICONS[reel]);
            out.push_str(" | ");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_win_requires_three_of_a_kind() {
        assert!(Spin::from_reels([4, 4, 4]).is_win());
        assert!(!Spin::from_reels([4, 4, 5]).is_win());
        assert!(!Spin::from_reels([1, 4, 4]).is_win());
    }

    #[test]
    fn test_render_and_verdict() {
        let spin = Spin::from_reels([0, 1, 2]);
        assert_eq!(spin.render(), " | 🍒 | 🍋 | 🔔 | ");
        assert_eq!(spin.verdict(), LOSE);
        assert_eq!(Spin::from_reels([8, 8, 17]).verdict(), WIN);
    }

    #[test]
    fn test_roll_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let spin = Spin::roll(&mut rng);
            assert!(spin.reels.iter().all(|&r| r < ICONS.len()));
        }
    }
}
