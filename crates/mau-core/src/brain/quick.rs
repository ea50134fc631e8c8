//! Canned shortcut replies for trivial greetings.
//!
//! Trimmed messages under 15 characters containing a trigger phrase are
//! answered instantly from a fixed variant pool, never touching a provider.

use rand::seq::SliceRandom;

/// Maximum message length (in characters) eligible for a canned reply.
const MAX_CHARS: usize = 15;

/// Appended to every canned reply so the shortcut is visible to the user.
pub const QUICK_NOTE: &str = "\n\n(※即レスモード⚡)";

struct QuickTrigger {
    phrases: &'static [&'static str],
    replies: &'static [&'static str],
}

const TRIGGERS: &[QuickTrigger] = &[
    QuickTrigger {
        phrases: &["おはよ"],
        replies: &[
            "おはよー！☀️ 今日も一日頑張ろうね！",
            "おはよう！✨ 朝から会えてうれしいな〜",
            "おはよ〜！今日もまうと一緒に楽しくいこ！🌸",
        ],
    },
    QuickTrigger {
        phrases: &["こんにちは", "こんちは", "やっほ"],
        replies: &[
            "やっほー！🙌 来てくれてありがと！",
            "こんにちは〜！✨ 今日はどんな一日？",
        ],
    },
    QuickTrigger {
        phrases: &["こんばんは"],
        replies: &[
            "こんばんは〜！🌙 今日もおつかれさま！",
            "ばんは！✨ 夜もまうはげんきだよ〜",
        ],
    },
    QuickTrigger {
        phrases: &["おやすみ", "またね", "バイバイ"],
        replies: &[
            "おやすみ〜！🌙 いい夢みてね！",
            "またね！👋 また遊びにきてくれたらうれしいな💕",
        ],
    },
    QuickTrigger {
        phrases: &["好き", "すき"],
        replies: &[
            "えへへ、照れるなぁ☺️ 私も大好きだよ！💕",
            "ありがと〜！！まうも大好き！😊💕",
        ],
    },
    QuickTrigger {
        phrases: &["いる？", "おる？"],
        replies: &[
            "いるよー！🙌 どうしたの？",
            "呼んだ？✨ まうはいつでもここにいるよ！",
        ],
    },
];

/// Returns a canned reply (with the shortcut note appended) when the message
/// qualifies, None otherwise. Cannot fail.
pub fn quick_reply(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() >= MAX_CHARS {
        return None;
    }
    let trigger = TRIGGERS
        .iter()
        .find(|t| t.phrases.iter().any(|p| trimmed.contains(p)))?;
    let reply = trigger
        .replies
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(trigger.replies[0]);
    Some(format!("{}{}", reply, QUICK_NOTE))
}
