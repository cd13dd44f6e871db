use autopilot_core::{MockArtifact, Task, TestReport};

/// Produces the text and contract artifacts written during the lifecycle.
pub trait ArtifactGenerator: Send + Sync {
    /// Spec body appended under the task's `Spec` section while drafting.
    fn spec(&self, task: &Task) -> String;

    fn mock(&self, task: &Task) -> MockArtifact;

    fn pr_body(&self, task: &Task, mock_path: &str, report: &TestReport) -> String;

    fn user_doc(&self, task: &Task, pr_link: &str) -> String;
}

/// Fills fixed section templates from the task fields.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl ArtifactGenerator for TemplateGenerator {
    fn spec(&self, task: &Task) -> String {
        let background = if task.description.trim().is_empty() {
            "待补充"
        } else {
            task.description.trim()
        };

        format!(
            r#"# 功能概述
- 目标：{title}
- 背景：{background}

# 需求范围
- Must：
- Should：
- Optional：

# 约束/依赖
- 约束：
- 依赖：

# 接口/数据
- 输入：
- 输出：
- 数据结构：

# 验收标准
- [ ] 
- [ ] 

# 测试点
- [ ] 
- [ ] 

# 风险/待确认
- "#,
            title = task.title.trim(),
            background = background,
        )
    }

    fn mock(&self, task: &Task) -> MockArtifact {
        MockArtifact::scaffold(task)
    }

    fn pr_body(&self, task: &Task, mock_path: &str, report: &TestReport) -> String {
        let verdict = if report.passed { "通过" } else { "失败" };
        format!(
            r#"## 需求摘要
- {title}

## 变更说明
- 新增 mock 文件 `{mock_path}`

## 测试结果
- Mock：通过
- 测试：{verdict}（{summary}）

## 风险/注意事项
- 待补充
"#,
            title = task.title.trim(),
            mock_path = mock_path,
            verdict = verdict,
            summary = report.summary.trim(),
        )
    }

    fn user_doc(&self, task: &Task, pr_link: &str) -> String {
        let mock_line = task
            .mock_path
            .as_deref()
            .map(|p| format!("- 接口约定：`{}`\n", p))
            .unwrap_or_default();

        format!(
            "# {title}\n\n- 已合并：{pr_link}\n{mock_line}\n{description}\n",
            title = task.title.trim(),
            pr_link = pr_link,
            mock_line = mock_line,
            description = task.description.trim(),
        )
    }
}
