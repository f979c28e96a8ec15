//! ユーザー定義クラスの一覧

use serde::Serialize;

use crate::error::{Result, SessionError};

/// クラスラベル
///
/// `id` は作成時の位置と一致し、リセットされるまで変わりません。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLabel {
    pub id: usize,
    pub name: String,
    pub sample_count: usize,
}

/// 追加のみ可能なクラス一覧
#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    classes: Vec<ClassLabel>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// クラスを追加
    ///
    /// 空白のみの名前は無視して `None` を返します。名前の重複は許可します。
    pub fn add_class(&mut self, name: &str) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let id = self.classes.len();
        self.classes.push(ClassLabel {
            id,
            name: name.to_string(),
            sample_count: 0,
        });
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ClassLabel> {
        self.classes.get(id)
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    /// 登録順のクラス名
    pub fn names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    pub fn ensure_valid(&self, id: usize) -> Result<()> {
        if id < self.classes.len() {
            Ok(())
        } else {
            Err(SessionError::UnknownClass {
                id,
                len: self.classes.len(),
            })
        }
    }

    /// サンプル数を1増やして新しい値を返す
    pub(crate) fn record_sample(&mut self, id: usize) -> Result<usize> {
        let len = self.classes.len();
        let class = self
            .classes
            .get_mut(id)
            .ok_or(SessionError::UnknownClass { id, len })?;
        class.sample_count += 1;
        Ok(class.sample_count)
    }

    pub fn total_samples(&self) -> usize {
        self.classes.iter().map(|c| c.sample_count).sum()
    }

    /// 学習可能か: 2クラス以上あり、全クラスにサンプルがある
    pub fn is_ready(&self) -> bool {
        self.classes.len() >= 2 && self.classes.iter().all(|c| c.sample_count > 0)
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_consecutive_from_zero() {
        let mut registry = ClassRegistry::new();
        for (expected, name) in ["cat", "dog", "cat"].iter().enumerate() {
            assert_eq!(registry.add_class(name), Some(expected));
            assert_eq!(registry.len(), expected + 1);
        }
        assert_eq!(registry.names(), vec!["cat", "dog", "cat"]);
    }

    #[test]
    fn blank_names_are_ignored() {
        let mut registry = ClassRegistry::new();
        assert_eq!(registry.add_class(""), None);
        assert_eq!(registry.add_class("   "), None);
        assert_eq!(registry.add_class("\t\n"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn readiness_requires_two_populated_classes() {
        let mut registry = ClassRegistry::new();
        assert!(!registry.is_ready());

        registry.add_class("a");
        registry.record_sample(0).unwrap();
        assert!(!registry.is_ready());

        registry.add_class("b");
        assert!(!registry.is_ready());

        registry.record_sample(1).unwrap();
        assert!(registry.is_ready());

        registry.add_class("c");
        assert!(!registry.is_ready());
    }

    #[test]
    fn record_sample_rejects_unknown_id() {
        let mut registry = ClassRegistry::new();
        registry.add_class("only");
        let err = registry.record_sample(3).unwrap_err();
        assert!(matches!(err, SessionError::UnknownClass { id: 3, len: 1 }));
        assert_eq!(registry.total_samples(), 0);
    }
}
