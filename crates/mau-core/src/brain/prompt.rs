//! Instruction-block assembly.
//!
//! The block layout is a hard contract: the trailing format directive is what
//! makes reply parsing work, and the schedule rules are what make the persona
//! surface place, price, and bonus details from the context block.

use crate::shared::{ChatTurn, Speaker, PERSONA_DISPLAY_NAME};
use chrono::{DateTime, FixedOffset};

/// Delimiter the model is instructed to emit between reply text and
/// follow-up suggestions.
pub const SUGGESTIONS_DELIMITER: &str = "===SUGGESTIONS===";

/// Everything the assembler needs for one turn.
pub struct PromptInput<'a> {
    pub user_name: &'a str,
    pub text: &'a str,
    pub history: &'a [ChatTurn],
    /// Rendered query result, present when the message was a data question.
    pub context: Option<&'a str>,
    /// Caller-supplied region signal, compared against the home region.
    pub region: Option<&'a str>,
    pub home_region: &'a str,
    pub now: DateTime<FixedOffset>,
}

/// Builds the full instruction block. The persona itself is not part of the
/// block; it travels as the cascade's system text.
pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let mut prompt = format!(
        "あなたはアイドルの「AIまう」です。\n\
         現在、ファンの「{user}」さんからメッセージが届きました。\n\n\
         【現在日時】\n{now}\n\n\
         【会話履歴】\n{history}\n",
        user = input.user_name,
        now = input.now.format("%Y-%m-%d (%a) %H:%M %:z"),
        history = render_history(input),
    );

    if let Some(context) = input.context {
        prompt.push_str(&format!(
            "\n【参考データ (分析結果)】\n\
             以下はユーザーの質問に関連するデータベース検索結果です。\n\
             このデータに基づいて回答してください。データがない場合は「予定はないみたい」と答えてください。\n\
             ------------------------\n\
             {}\n\
             ------------------------\n",
            context
        ));
    }

    prompt.push_str(&format!(
        "\n【指示】\n\
         1. キャラ設定を守ってください。\n\
         2. 文頭で必ず「{user}！」や「{user}ちゃん！」と名前を呼んでください。\n\
         3. {locale}\n\
         4. 親しい友達のようにタメ口で返信してください。\n\
         5. {length}\n",
        user = input.user_name,
        locale = locale_directive(input),
        length = length_directive(input),
    ));

    prompt.push_str(
        "\n【回答のルール (スケジュール)】\n\
         1. **詳細情報**: 可能な限り「場所 (Place)」と「金額 (Price)」も案内すること。\n\
         2. **特典 (Bonus)**: もし「特典 (bonus)」があるイベントなら、**「この日は〇〇の特典があるから絶対来てほしい！」と優先的にアピール** すること。（絵文字 🎁✨ を使うなど強調して）\n\
         3. **誘導**: チケットURLがある場合は、お誘いすること。\n",
    );

    prompt.push_str(&format!(
        "\n【返信フォーマット】\n\
         本文のあとに必ず「{delim}」だけの行を書き、その後にユーザーが次に送りそうな短い返信候補を最大3つ、1行ずつ書いてください。\n",
        delim = SUGGESTIONS_DELIMITER
    ));

    prompt
}

/// History as "name: text" lines, oldest first, ending with the new message.
fn render_history(input: &PromptInput<'_>) -> String {
    let mut lines: Vec<String> = input
        .history
        .iter()
        .map(|turn| {
            let name = match turn.role {
                Speaker::User => input.user_name,
                Speaker::Ai => PERSONA_DISPLAY_NAME,
            };
            format!("{}: {}", name, turn.text.trim())
        })
        .collect();
    lines.push(format!("{}: {}", input.user_name, input.text.trim()));
    lines.join("\n")
}

fn locale_directive(input: &PromptInput<'_>) -> &'static str {
    let at_home = input
        .region
        .map(|r| r.eq_ignore_ascii_case(input.home_region))
        .unwrap_or(true);
    if at_home {
        "**相手が英語で話しかけてきた場合は英語で、日本語なら日本語で返信してください。**"
    } else {
        "**ユーザーは海外からアクセスしています。ユーザーのメッセージの言語（わからなければ英語）で、同じアイドルの人格のまま返信してください。**"
    }
}

fn length_directive(input: &PromptInput<'_>) -> &'static str {
    // A context block with table rows means schedule details are coming;
    // completeness wins over brevity there.
    let has_rows = input.context.map(|c| c.contains('|')).unwrap_or(false);
    if has_rows {
        "ライブの告知やスケジュール詳細を伝える場合は、情報が漏れないように文字数制限を無視して長くなっても構いません。"
    } else {
        "返信は基本「200文字以内」で、テンポよく短く返してください。"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jst(y: i32, mo: u32, d: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, 12, 0, 0)
            .unwrap()
    }

    fn base_input<'a>(history: &'a [ChatTurn], context: Option<&'a str>) -> PromptInput<'a> {
        PromptInput {
            user_name: "Aki",
            text: "いつライブある？",
            history,
            context,
            region: Some("JP"),
            home_region: "JP",
            now: jst(2025, 10, 8),
        }
    }

    #[test]
    fn test_block_order_and_addressing() {
        let history = vec![
            ChatTurn { role: Speaker::User, text: "やっほー".to_string() },
            ChatTurn { role: Speaker::Ai, text: "やっほ！".to_string() },
        ];
        let prompt = build_prompt(&base_input(&history, None));

        let time_pos = prompt.find("【現在日時】").unwrap();
        let history_pos = prompt.find("【会話履歴】").unwrap();
        let directive_pos = prompt.find("【指示】").unwrap();
        let format_pos = prompt.find("【返信フォーマット】").unwrap();
        assert!(time_pos < history_pos && history_pos < directive_pos && directive_pos < format_pos);

        assert!(prompt.contains("Aki: やっほー"));
        assert!(prompt.contains("AIまう: やっほ！"));
        assert!(prompt.contains("Aki: いつライブある？"));
        assert!(prompt.contains("「Aki！」や「Akiちゃん！」"));
        assert!(prompt.contains(SUGGESTIONS_DELIMITER));
    }

    #[test]
    fn test_context_block_present_with_bonus_rules() {
        let table = "| title | bonus |\n|---|---|\n| Anniversary | 限定チェキ |";
        let prompt = build_prompt(&base_input(&[], Some(table)));
        assert!(prompt.contains("【参考データ (分析結果)】"));
        assert!(prompt.contains("限定チェキ"));
        assert!(prompt.contains("特典 (Bonus)"));
        assert!(prompt.contains("🎁✨"));
        // Table rows relax the length budget.
        assert!(prompt.contains("文字数制限を無視して"));
    }

    #[test]
    fn test_no_context_keeps_short_length_directive() {
        let prompt = build_prompt(&base_input(&[], None));
        assert!(!prompt.contains("【参考データ"));
        assert!(prompt.contains("200文字以内"));
    }

    #[test]
    fn test_foreign_region_switches_language_directive() {
        let mut input = base_input(&[], None);
        input.region = Some("US");
        let prompt = build_prompt(&input);
        assert!(prompt.contains("海外からアクセス"));

        input.region = Some("jp");
        let prompt = build_prompt(&input);
        assert!(prompt.contains("日本語なら日本語で"));
    }

    #[test]
    fn test_missing_region_defaults_to_home() {
        let mut input = base_input(&[], None);
        input.region = None;
        let prompt = build_prompt(&input);
        assert!(prompt.contains("日本語なら日本語で"));
    }
}
