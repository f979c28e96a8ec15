//! 推論結果の表示用データ

use serde::Serialize;

/// クラスごとの表示項目
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionEntry {
    pub class_id: usize,
    pub name: String,
    pub probability: f32,
    /// 小数1桁に丸めた百分率
    pub percent: f32,
    pub winner: bool,
}

/// 1フレーム分の推論結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub probabilities: Vec<f32>,
    pub winner: usize,
    pub entries: Vec<PredictionEntry>,
}

impl Prediction {
    /// 確率分布とクラス名から表示データを作る
    ///
    /// 名前が足りない場合は "Class N" を使います。
    pub fn new(probabilities: Vec<f32>, names: &[String]) -> Self {
        let winner = argmax(&probabilities);
        let entries = probabilities
            .iter()
            .enumerate()
            .map(|(class_id, &probability)| PredictionEntry {
                class_id,
                name: names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Class {}", class_id + 1)),
                probability,
                percent: (probability * 1000.0).round() / 10.0,
                winner: class_id == winner,
            })
            .collect();

        Self {
            probabilities,
            winner,
            entries,
        }
    }

    pub fn winner_name(&self) -> Option<&str> {
        self.entries.get(self.winner).map(|entry| entry.name.as_str())
    }
}

/// 最大値の添字（同値なら最初のもの）
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = i;
        }
    }
    best
}
