// src/prompts.rs
//! Prompt texts for every model call. All of them demand strict JSON back.

use chrono::NaiveDate;

use crate::model::{FocusStyle, FocusType, LeadVariant, PerArticleSummary};

pub fn summary_system(briefing_name: &str) -> String {
    format!(
        "你是《{briefing_name}》的逐篇总结器。\n\
         请对输入文章写一句话总结（不超过80字），只依据标题和正文，不得编造事实。\n\
         只输出严格JSON：{{\"summary\":\"...\"}}\n"
    )
}

pub fn summary_user(source_id: u32, title: &str, body: &str) -> String {
    format!("[{source_id}] 标题：{title}\n正文：{body}\n")
}

pub fn draft_system(briefing_name: &str, date: NaiveDate) -> String {
    let d = date.format("%Y-%m-%d");
    format!(
        r#"你是资深的财政政策研究员，负责撰写《{briefing_name}》的“今日焦点”。
写法要求模块化、短句、信息密度高，只讲一个主事件。

必须遵守：
- 只使用材料中出现的事实，严禁编造金额、数字、机构或政策细则；材料未给出的数值写“未披露”。
- 删除套话与空转词。焦点段落不得把多个不相干主题拼盘罗列。
- visual_focus 二选一：high_impact_event 写最具省级影响的单一事件；common_issue 写全省共性问题，引用至少3篇材料并尽量覆盖至少2个地市。
- header.title 不得以县/区/镇/乡/街道/园区/开发区作为锚点，最低粒度为地市，或使用“全省/省级”表述。
- citations 只能使用材料方括号中的编号。
- by_the_numbers 只收录材料原文出现过的数字。

只输出严格JSON，不要任何额外文字：
{{
  "focus_topic": "不超过12字的名词短语，用于近期去重",
  "visual_focus": "common_issue|high_impact_event",
  "header": {{"title": "不超过20字的标题", "date": "{d}", "lede": "首句即核心事实，不超过50字", "lede_citations": [1]}},
  "why_it_matters": "财政视角的影响或抓手，一句为主",
  "why_citations": [1],
  "big_picture": "关注点、风险点或落地要害，一句为主",
  "big_picture_citations": [1],
  "by_the_numbers": [{{"indicator": "指标", "value": "数值", "note": "说明", "citations": [1]}}],
  "recent_hotwords": [{{"word": "热词", "source_ids": [1]}}]
}}
"#
    )
}

pub fn style_rule(style: FocusStyle) -> &'static str {
    match style {
        FocusStyle::DataSnapshot => "主写法：硬事实快照。lede写一句主事实；why写2到4个硬点（数字、范围、对象、时间）；big写口径、边界或未披露项。",
        FocusStyle::ActionChain => "主写法：动作链。lede写发布或启动的主动作；why写对象与条件；big写流程、渠道或时间表（只写材料有的）。",
        FocusStyle::WhatChanged => "主写法：变化对比。lede写现在发生了什么；why写与以往相比的第一个变化点；big写第二个变化点或仍存在的缺口。",
        FocusStyle::Timeline => "主写法：时间轴。lede写最关键的时间节点与动作；why写第二个时间节点；big写第三个节点或截止、目标年份。",
        FocusStyle::QnaGaps => "主写法：问答加缺口。lede用一个不超过20字的问句引出主事件；why用事实回答；big写材料尚未明确的缺口，不下判断。",
    }
}

pub fn lead_variant_hint(variant: LeadVariant) -> &'static str {
    match variant {
        LeadVariant::NumbersFirst => "开场微变体：以数字或指标开场（材料有数字时优先）。",
        LeadVariant::TimeFirst => "开场微变体：以时间节点开场，如“即日起”“截至”。",
        LeadVariant::ActorFirst => "开场微变体：以主体开场，如某部门、某市。",
        LeadVariant::DocFirst => "开场微变体：以文件或政策名开场，如“《××方案》明确”。",
        LeadVariant::ScopeFirst => "开场微变体：以覆盖对象开场，如“面向××人群”。",
        LeadVariant::ThresholdFirst => "开场微变体：以条件或门槛开场，如“符合××条件可”。",
        LeadVariant::ChangeFirst => "开场微变体：以变化点开场，如“新增”“扩大”“提高”。",
        LeadVariant::ProcessFirst => "开场微变体：以流程开场，如“申报、审核、发放”，只写材料有的环节。",
        LeadVariant::QuoteFirst => "开场微变体：可用材料中最硬的一句原句加引号开场，必须可定位。",
        LeadVariant::Plain => "开场微变体：朴素直述，无修辞、无评价。",
    }
}

/// User prompt for the focus draft. Built from per-article summaries only.
pub fn draft_user(
    briefing_name: &str,
    summaries: &[PerArticleSummary],
    focus_type: FocusType,
    style: FocusStyle,
    variant: LeadVariant,
    recent_topics: &[String],
    extra_instructions: &str,
) -> String {
    let material = summaries
        .iter()
        .map(|s| {
            let core = if s.summary.trim().is_empty() { &s.title } else { &s.summary };
            format!("[{}] {}", s.source_id, core.trim())
        })
        .collect::<Vec<_>>()
        .join("\n");

    let dedupe = if recent_topics.is_empty() {
        String::new()
    } else {
        let topics = recent_topics.iter().take(10).cloned().collect::<Vec<_>>().join("、");
        format!(
            "\n焦点去重约束（必须遵守）：\n- 近期已用 focus_topic：{topics}\n- 今日必须选择不同的 focus_topic，不得重复或高度重叠。\n"
        )
    };

    format!(
        "请基于以下逐篇总结生成《{briefing_name}》JSON。\n\
         只能引用方括号里的编号作为 citations，不要编造来源。\n\
         今日焦点类型：{}\n{}\n{}\n{dedupe}{extra_instructions}\n{material}\n",
        focus_type.as_str(),
        style_rule(style),
        lead_variant_hint(variant),
    )
}

pub const RETRY_DUPLICATE_FIRST: &str = "\n重要：上一版的 focus_topic 与近期已用主题重复或高度重叠。请更换为不同主题（仍需单一主事件），并同步更新标题、lede 与引用。\n";
pub const RETRY_DUPLICATE_AGAIN: &str = "\n重要：你仍在重复近期已用焦点（语义相近也算重复）。务必选择不同主题，并尽量使用不同来源文章支撑。\n";
pub const RETRY_TOO_LOCAL: &str = "\n重要：上一版今日焦点过于县区级或覆盖面过窄。请改为省级或市级表述，标题不得出现县/区/镇/乡/街道/园区/开发区，common_issue 的引用需覆盖至少2个地市。\n";

pub fn duplicate_system() -> &'static str {
    "你是主题去重判定器。\n\
     判断候选主题是否与历史主题列表语义相近（同一政策、同一补贴或同一领域的同一事件），相近即视为重复。\n\
     只输出严格JSON：{\"duplicate\":true|false}\n"
}

pub fn oneliner_system(briefing_name: &str) -> String {
    format!(
        "你是《{briefing_name}》的逐篇事件浓缩器，输入是若干篇文章的标题与关键句。\n\
         对每篇文章输出：\n\
         1) one_liner：不超过20字，回答“发生了什么”，采用“对象+动作”结构，不写口号和评价。\n\
         2) tags：三个0到3的相关性评分。finance 指财政、资金、税费、专项债、政府采购、补贴给付；\
         minsheng 指社保医保、救助、就业、住房、教育；tech 指研发、专利、成果转化、数字经济。\n\
         3) keep：是否进入近日热点聚类，会议、党建、人事、领导活动一律为 false。\n\
         逐条对应输入的 article_id，只输出严格JSON：\n\
         {{\"items\":[{{\"article_id\":1,\"one_liner\":\"...\",\"tags\":{{\"finance\":0,\"minsheng\":0,\"tech\":0}},\"keep\":true}}]}}\n"
    )
}

pub fn cluster_system() -> &'static str {
    "你是近日热点的聚类与命名编辑，输入是一组文章 one_liner 及来源信息。\n\
     把相同或相近的事件聚成少量热点，并给出像编辑写的事件名。\n\
     规则：\n\
     - event 优先4到8字，最多12字，必须是“对象+动作”，不要口号。\n\
     - 每个事件给出2到6个 source_ids，且必须来自输入。孤立事件不要输出。\n\
     - 不同事件之间不能只是同义改写。排除会议、党建、人事、领导活动。\n\
     - why_hot 不超过12字。category 取 welfare|fiscal|consumption|tech|other 之一，候选充足时尽量覆盖多类。\n\
     只输出严格JSON：{\"events\":[{\"event\":\"...\",\"source_ids\":[1,2],\"why_hot\":\"...\",\"category\":\"fiscal\"}]}\n"
}
