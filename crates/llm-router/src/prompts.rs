use std::collections::HashMap;

/// A reusable prompt template with a system/user split, `{variable}`
/// placeholders, and optional few-shot examples.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
    pub variables: Vec<&'static str>,
    /// Few-shot (user, assistant) pairs inserted between the system
    /// prompt and the live request.
    pub examples: Vec<(String, String)>,
}

impl PromptTemplate {
    pub fn render(&self, vars: &HashMap<String, String>) -> (String, String) {
        (substitute(&self.system, vars), substitute(&self.user, vars))
    }

    /// Examples with the same substitution applied to both sides.
    pub fn rendered_examples(&self, vars: &HashMap<String, String>) -> Vec<(String, String)> {
        self.examples
            .iter()
            .map(|(user, assistant)| (substitute(user, vars), substitute(assistant, vars)))
            .collect()
    }
}

fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Template registry keyed by (model_type, task_type, language). The
/// model_type axis lets Chinese-first models carry different phrasing
/// than the English-first ones; "generic" matches any model.
pub struct PromptRegistry {
    templates: HashMap<(String, String, String), PromptTemplate>,
}

impl PromptRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            templates: HashMap::new(),
        };

        registry.register(
            "generic",
            "financial_analysis",
            "en",
            PromptTemplate {
                system: "You are a senior financial analyst. Ground every claim in the \
                         data provided and state your confidence."
                    .to_string(),
                user: "Analyze {symbol} as of {date}.\n\nData:\n{context}\n\nProduce a \
                       concise report covering valuation, momentum, and key risks."
                    .to_string(),
                variables: vec!["symbol", "date", "context"],
                examples: vec![(
                    "Analyze DEMO as of 2024-03-01.\n\nData:\npe_ratio=12.4, \
                     revenue_growth=0.18, price change +9% over 30 days, rsi=58"
                        .to_string(),
                    "Valuation: at 12.4x earnings with 18% revenue growth the stock \
                     trades below growth peers. Momentum: +9% on a neutral RSI of 58 \
                     leaves room before overbought. Key risks: growth deceleration and \
                     sector rotation. Confidence: moderate."
                        .to_string(),
                )],
            },
        );
        registry.register(
            "generic",
            "stock_analysis",
            "en",
            PromptTemplate {
                system: "You are an equity research assistant. Be specific and avoid \
                         hedging language."
                    .to_string(),
                user: "Evaluate {symbol} using the following inputs:\n{context}".to_string(),
                variables: vec!["symbol", "context"],
                examples: Vec::new(),
            },
        );
        registry.register(
            "generic",
            "financial_analysis",
            "zh",
            PromptTemplate {
                system: "你是一位资深金融分析师。所有结论必须基于提供的数据，并说明置信度。"
                    .to_string(),
                user: "请基于以下数据分析 {symbol}（截至 {date}）：\n{context}".to_string(),
                variables: vec!["symbol", "date", "context"],
                examples: vec![(
                    "请基于以下数据分析 DEMO（截至 2024-03-01）：\n市盈率=12.4，营收增速=18%，\
                     近30日涨幅+9%，RSI=58"
                        .to_string(),
                    "估值：12.4倍市盈率配合18%的营收增速，低于同类成长股。动量：+9%且RSI为58，\
                     尚未超买。主要风险：增速放缓与板块轮动。置信度：中等。"
                        .to_string(),
                )],
            },
        );

        registry
    }

    pub fn register(
        &mut self,
        model_type: &str,
        task_type: &str,
        language: &str,
        template: PromptTemplate,
    ) {
        self.templates.insert(
            (
                model_type.to_string(),
                task_type.to_string(),
                language.to_string(),
            ),
            template,
        );
    }

    /// Most specific match first, then the generic model row, then the
    /// English fallback for the task.
    pub fn lookup(
        &self,
        model_type: &str,
        task_type: &str,
        language: &str,
    ) -> Option<&PromptTemplate> {
        self.templates
            .get(&(
                model_type.to_string(),
                task_type.to_string(),
                language.to_string(),
            ))
            .or_else(|| {
                self.templates.get(&(
                    "generic".to_string(),
                    task_type.to_string(),
                    language.to_string(),
                ))
            })
            .or_else(|| {
                self.templates.get(&(
                    "generic".to_string(),
                    task_type.to_string(),
                    "en".to_string(),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_replaces_all_placeholders() {
        let registry = PromptRegistry::with_defaults();
        let template = registry
            .lookup("generic", "financial_analysis", "en")
            .unwrap();
        let mut vars = HashMap::new();
        vars.insert("symbol".to_string(), "AAPL".to_string());
        vars.insert("date".to_string(), "2025-06-02".to_string());
        vars.insert("context".to_string(), "pe=28".to_string());
        let (system, user) = template.render(&vars);
        assert!(!system.contains('{'));
        assert!(user.contains("AAPL"));
        assert!(user.contains("pe=28"));
    }

    #[test]
    fn lookup_falls_back_to_english_generic() {
        let registry = PromptRegistry::with_defaults();
        assert!(registry
            .lookup("deepseek", "stock_analysis", "de")
            .is_some());
        assert!(registry.lookup("generic", "unknown_task", "en").is_none());
    }

    #[test]
    fn financial_templates_carry_few_shot_examples() {
        let registry = PromptRegistry::with_defaults();
        let template = registry
            .lookup("generic", "financial_analysis", "en")
            .unwrap();
        let examples = template.rendered_examples(&HashMap::new());
        assert_eq!(examples.len(), 1);
        let (example_user, example_assistant) = &examples[0];
        assert!(example_user.contains("DEMO"));
        assert!(example_assistant.contains("Confidence"));

        // Tasks without curated examples simply splice nothing.
        let plain = registry.lookup("generic", "stock_analysis", "en").unwrap();
        assert!(plain.examples.is_empty());
    }
}
