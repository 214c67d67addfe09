use crate::models::ChatMessage;
use crate::upstream::{ContentPart, InputMessage};

// One kind of upstream call. Decides the token budget and the messages a
// failure is reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Transcribe,
    Summarize,
    Questions,
    Suggest,
    AnalyzeTranscript,
    AnalyzeSummary,
    Chat,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Summarize => "summarize",
            Task::Questions => "questions",
            Task::Suggest => "suggest",
            Task::AnalyzeTranscript => "analyze_transcript",
            Task::AnalyzeSummary => "analyze_summary",
            Task::Chat => "chat",
        }
    }

    pub fn max_output_tokens(self) -> u32 {
        match self {
            Task::Transcribe | Task::AnalyzeTranscript => 3000,
            Task::AnalyzeSummary => 1200,
            Task::Summarize => 800,
            Task::Chat => 400,
            Task::Questions | Task::Suggest => 200,
        }
    }

    // used when the upstream fails without an error message of its own
    pub fn failure_message(self) -> &'static str {
        match self {
            Task::Transcribe => "全文書き起こしに失敗しました。",
            Task::Summarize => "要約に失敗しました。",
            Task::Questions | Task::Suggest => "質問候補の取得に失敗しました。",
            Task::AnalyzeTranscript | Task::AnalyzeSummary => "画像の解析に失敗しました。",
            Task::Chat => "返信の取得に失敗しました。",
        }
    }

    // used when the upstream succeeded but produced nothing usable
    pub fn empty_message(self) -> &'static str {
        match self {
            Task::Transcribe | Task::AnalyzeTranscript => "全文書き起こしを取得できませんでした。",
            Task::Summarize => "要約を取得できませんでした。",
            Task::Questions | Task::Suggest => "質問候補を取得できませんでした。",
            Task::AnalyzeSummary => "解析結果を取得できませんでした。",
            Task::Chat => "返信を取得できませんでした。",
        }
    }
}

const TRANSCRIBE_PROMPT: &str = "画像内の文章を日本語で全文書き起こししてください。";

pub fn transcribe(image: &str) -> Vec<InputMessage> {
    vec![InputMessage::new(
        "user",
        vec![ContentPart::text(TRANSCRIBE_PROMPT), ContentPart::image(image)],
    )]
}

pub fn summarize(transcript: &str) -> Vec<InputMessage> {
    let text = format!(
        "以下の全文書き起こしを基に、日本語で要約してください。\
         マークダウンは使わず、句点「。」ごとに改行してください。\n\n{}",
        transcript
    );
    vec![InputMessage::new("user", vec![ContentPart::text(text)])]
}

pub fn questions(transcript: &str) -> Vec<InputMessage> {
    let text = format!(
        "以下の全文書き起こしを基に、次に聞くと良い質問を日本語で3つ作ってください。\
         質問は各20文字程度のシンプルな日本語で、出力はJSON配列のみです。\n\n{}",
        transcript
    );
    vec![InputMessage::new("user", vec![ContentPart::text(text)])]
}

// Summary and questions in one call, answered as a JSON object
pub fn analyze_summary(transcript: &str) -> Vec<InputMessage> {
    let text = format!(
        "以下の全文書き起こしを基に、日本語で要約と質問案を作成してください。\
         出力は必ずJSONのみで返し、次の形式にしてください。\
         {{\"summary\":\"要約\",\"questions\":[\"質問1\",\"質問2\",\"質問3\"]}}。\
         質問は各20文字程度のシンプルな日本語にしてください。\n\n{}",
        transcript
    );
    vec![InputMessage::new("user", vec![ContentPart::text(text)])]
}

pub fn suggest(summary: &str, messages: &[ChatMessage]) -> Vec<InputMessage> {
    let mut input = vec![
        InputMessage::new(
            "system",
            vec![ContentPart::text(
                "あなたは画像要約を深掘りする質問を提案するアシスタントです。\
                 次に聞くと良い質問を日本語で3つ提案してください。\
                 出力はJSON配列のみで、番号や箇条書きは不要です。",
            )],
        ),
        InputMessage::new("user", vec![ContentPart::text(format!("要約:\n{}", summary))]),
    ];

    let history = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    if !history.is_empty() {
        input.push(InputMessage::new(
            "user",
            vec![ContentPart::text(format!("これまでの会話:\n{}", history))],
        ));
    }
    input
}

pub fn chat(summary: &str, image: Option<&str>, messages: &[ChatMessage]) -> Vec<InputMessage> {
    let system = format!(
        "あなたは画像の要約の続きを扱うアシスタントです。\
         以下は画像の要約です。\n{}\n要約を踏まえて、ユーザーの質問に日本語で簡潔に答えてください。\
         マークダウンは使わず、句点「。」ごとに改行してください。\
         画像が提供されている場合は参照して構いません。",
        summary
    );
    let mut input = vec![InputMessage::new("system", vec![ContentPart::text(system)])];

    if let Some(image) = image {
        input.push(InputMessage::new(
            "user",
            vec![ContentPart::text("参考画像"), ContentPart::image(image)],
        ));
    }

    input.extend(messages.iter().map(|m| {
        InputMessage::new(m.role.as_str(), vec![ContentPart::text(m.content.clone())])
    }));
    input
}
