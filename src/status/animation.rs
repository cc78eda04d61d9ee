use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const BAR_WIDTH: usize = 10;
const PROGRESS_EMOJIS: [&str; 5] = ["🤔", "🤖", "💡", "✨", "✅"];
const CYCLE_STATES: [(&str, &str); 4] = [
    ("Processing", "🤔"),
    ("Analyzing Query", "🤖"),
    ("Generating Content", "💡"),
    ("Finalizing", "✨"),
];
const MATRIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const CLOCK_FACES: [&str; 12] = [
    "🕛", "🕐", "🕑", "🕒", "🕓", "🕔", "🕕", "🕖", "🕗", "🕘", "🕙", "🕚",
];

/// Status animations. Frames are pure functions of `(tick, elapsed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Animation {
    ProgressBar,
    EmojiCycle,
    LoadingDots,
    Rocket,
    MatrixRain,
    Clock,
}

impl Animation {
    pub const ALL: [Animation; 6] = [
        Animation::ProgressBar,
        Animation::EmojiCycle,
        Animation::LoadingDots,
        Animation::Rocket,
        Animation::MatrixRain,
        Animation::Clock,
    ];

    pub fn random() -> Self {
        Self::ALL
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(Animation::LoadingDots)
    }

    pub fn frame(self, tick: u64, elapsed: Duration) -> String {
        let body = match self {
            Animation::ProgressBar => {
                // 0..=10 then back down to 1, repeating.
                let period = (2 * BAR_WIDTH) as u64;
                let pos = (tick % period) as usize;
                let filled = if pos <= BAR_WIDTH { pos } else { period as usize - pos };
                format!(
                    "<b>Thinking...</b> {}\n<code>[{}{}]</code>",
                    PROGRESS_EMOJIS[filled % PROGRESS_EMOJIS.len()],
                    "▓".repeat(filled),
                    "░".repeat(BAR_WIDTH - filled)
                )
            }
            Animation::EmojiCycle => {
                let (text, emoji) = CYCLE_STATES[(tick % CYCLE_STATES.len() as u64) as usize];
                format!("<b>{}</b> {}", text, emoji)
            }
            Animation::LoadingDots => {
                format!("<b>Generating Response</b>{}", ".".repeat((tick % 4) as usize))
            }
            Animation::Rocket => {
                let pos = (tick % (BAR_WIDTH as u64 + 1)) as usize;
                format!(
                    "<b>Sending Request...</b>\n<code>[{}🚀{}]</code> 🌍",
                    "~".repeat(pos.saturating_sub(1)),
                    " ".repeat(BAR_WIDTH - pos)
                )
            }
            Animation::MatrixRain => {
                let mut rng = StdRng::seed_from_u64(tick);
                let mut line = || -> String {
                    (0..15)
                        .map(|_| MATRIX_CHARS[rng.gen_range(0..MATRIX_CHARS.len())] as char)
                        .collect()
                };
                let first = line();
                let second = line();
                format!(
                    "<b>Accessing Neural Network...</b>\n<code>{}</code>\n<code>{}</code>",
                    first, second
                )
            }
            Animation::Clock => format!(
                "<b>Awaiting Response...</b> {}",
                CLOCK_FACES[(tick % CLOCK_FACES.len() as u64) as usize]
            ),
        };
        format!("{}\n<i>{}s</i>", body, elapsed.as_secs())
    }
}

/// Progress line for a download of `written` out of `total` bytes.
pub fn download_progress(label: &str, written: u64, total: Option<u64>) -> String {
    match total.filter(|t| *t > 0) {
        Some(total) => {
            let ratio = (written as f64 / total as f64).clamp(0.0, 1.0);
            let filled = (ratio * BAR_WIDTH as f64).round() as usize;
            format!(
                "<b>{}</b>\n<code>[{}{}] {:.1}%</code>",
                label,
                "▓".repeat(filled),
                "░".repeat(BAR_WIDTH - filled),
                ratio * 100.0
            )
        }
        None => format!("<b>{}</b>\n<code>{:.1} MB</code>", label, written as f64 / 1_048_576.0),
    }
}
