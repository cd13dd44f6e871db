use autopilot_core::{TaskField, TaskStatus};
use serde::{Deserialize, Serialize};

/// Property names of the Notion database backing the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionSchema {
    pub title: String,
    pub description: String,
    pub spec: String,
    pub status: String,
    pub mock: String,
    pub pr: String,
    pub test_report: String,
    pub user_doc: String,
    pub branch: String,
    pub commit: String,
    pub claim: String,
    pub notes: String,
    pub labels: String,
    pub last_transition: String,
    pub status_names: StatusNames,
}

impl Default for NotionSchema {
    fn default() -> Self {
        Self {
            title: "标题".to_string(),
            description: "描述/复现步骤".to_string(),
            spec: "验收标准/解决方案".to_string(),
            status: "状态".to_string(),
            mock: "Mock".to_string(),
            pr: "PR".to_string(),
            test_report: "Test Report".to_string(),
            user_doc: "User Doc".to_string(),
            branch: "Branch".to_string(),
            commit: "Commit".to_string(),
            claim: "Claim".to_string(),
            notes: "Notes".to_string(),
            labels: "Labels".to_string(),
            last_transition: "Last Transition".to_string(),
            status_names: StatusNames::default(),
        }
    }
}

impl NotionSchema {
    pub fn property_for(&self, field: TaskField) -> &str {
        match field {
            TaskField::Spec => &self.spec,
            TaskField::MockPath => &self.mock,
            TaskField::PrLink => &self.pr,
            TaskField::TestReport => &self.test_report,
            TaskField::UserDoc => &self.user_doc,
            TaskField::Notes => &self.notes,
            TaskField::Branch => &self.branch,
            TaskField::CommitSha => &self.commit,
            TaskField::ClaimToken => &self.claim,
        }
    }
}

/// Notion status option for each lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusNames {
    pub pending: String,
    pub drafting: String,
    pub implementing: String,
    pub self_review: String,
    pub testing: String,
    pub awaiting_test_status: String,
    pub awaiting_human_merge: String,
    pub completed: String,
    pub blocked: String,
}

impl Default for StatusNames {
    fn default() -> Self {
        Self {
            pending: "待处理".to_string(),
            drafting: "起草中".to_string(),
            implementing: "开发中".to_string(),
            self_review: "自审中".to_string(),
            testing: "测试中".to_string(),
            awaiting_test_status: "待测试".to_string(),
            awaiting_human_merge: "待合并".to_string(),
            completed: "已完成".to_string(),
            blocked: "已阻塞".to_string(),
        }
    }
}

impl StatusNames {
    pub fn name_of(&self, status: TaskStatus) -> &str {
        match status {
            TaskStatus::Pending => &self.pending,
            TaskStatus::Drafting => &self.drafting,
            TaskStatus::Implementing => &self.implementing,
            TaskStatus::SelfReview => &self.self_review,
            TaskStatus::Testing => &self.testing,
            TaskStatus::AwaitingTestStatus => &self.awaiting_test_status,
            TaskStatus::AwaitingHumanMerge => &self.awaiting_human_merge,
            TaskStatus::Completed => &self.completed,
            TaskStatus::Blocked => &self.blocked,
        }
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        TaskStatus::LIFECYCLE
            .iter()
            .chain(std::iter::once(&TaskStatus::Blocked))
            .find(|s| self.name_of(**s) == name)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_round_trip() {
        let names = StatusNames::default();
        for status in TaskStatus::LIFECYCLE {
            assert_eq!(names.status_of(names.name_of(status)), Some(status));
        }
        assert_eq!(names.status_of("已阻塞"), Some(TaskStatus::Blocked));
        assert_eq!(names.status_of("进行中"), None);
    }

    #[test]
    fn test_partial_schema_keeps_defaults() {
        let schema: NotionSchema = parse(r#"{"spec": "Acceptance", "status_names": {"pending": "Todo"}}"#);
        assert_eq!(schema.spec, "Acceptance");
        assert_eq!(schema.title, "标题");
        assert_eq!(schema.status_names.pending, "Todo");
        assert_eq!(schema.status_names.completed, "已完成");
    }

    fn parse(json: &str) -> NotionSchema {
        serde_json::from_str(json).unwrap()
    }
}
