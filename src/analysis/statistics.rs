//! 数字频率、随机性检验与状态转移矩阵。
//!
//! 入参统一是按 draw_time 降序（最新在前）的开奖列表，和仓储层 `load_recent` 的返回一致；
//! 需要时间顺序的指标（游程、Markov、快照）在内部反转为旧 -> 新。

use crate::storage::repository::DrawDto;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountRatio {
    pub count: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigitFrequency {
    pub total_digits: u64,
    pub digits: BTreeMap<String, CountRatio>,
    pub positions: BTreeMap<String, BTreeMap<String, CountRatio>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomnessMetrics {
    pub chi_square: f64,
    pub runs: u64,
    pub mean_sum: f64,
    pub std_sum: f64,
}

pub type TransitionMatrix = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MarkovTransitions {
    pub parity: TransitionMatrix,
    pub size: TransitionMatrix,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    pub period: String,
    pub sum: i32,
    pub odd_even: String,
    pub big_small: String,
    pub numbers: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalReport {
    pub period: String,
    pub window: usize,
    pub frequency: DigitFrequency,
    pub randomness: RandomnessMetrics,
    pub markov: MarkovTransitions,
    pub sequence: Vec<SnapshotEntry>,
}

fn distribution(counts: &BTreeMap<i32, u64>) -> (u64, BTreeMap<String, CountRatio>) {
    let total: u64 = counts.values().sum();
    // 总数为 0 时分母按 1 处理，比例全部为 0
    let denominator = total.max(1) as f64;
    let map = counts
        .iter()
        .map(|(digit, &count)| {
            (
                digit.to_string(),
                CountRatio {
                    count,
                    ratio: count as f64 / denominator,
                },
            )
        })
        .collect();
    (total, map)
}

fn seeded_counter() -> BTreeMap<i32, u64> {
    (0..=9).map(|d| (d, 0u64)).collect()
}

pub fn build_digit_frequency(draws: &[DrawDto]) -> DigitFrequency {
    let mut digit_counter = seeded_counter();
    let mut position_counters: Vec<BTreeMap<i32, u64>> = Vec::new();

    for draw in draws {
        for (idx, &number) in draw.numbers.iter().enumerate() {
            *digit_counter.entry(number).or_insert(0) += 1;
            if idx >= position_counters.len() {
                position_counters.push(seeded_counter());
            }
            *position_counters[idx].entry(number).or_insert(0) += 1;
        }
    }

    let (total_digits, digits) = distribution(&digit_counter);
    let positions = position_counters
        .iter()
        .enumerate()
        .map(|(idx, counter)| (format!("position_{}", idx + 1), distribution(counter).1))
        .collect();

    DigitFrequency {
        total_digits,
        digits,
        positions,
    }
}

/// 卡方统计量：对 0-9 十个数字求和，未出现的数字也计入。
pub fn chi_square_uniform(draws: &[DrawDto]) -> f64 {
    let mut counts = [0u64; 10];
    let mut total = 0u64;
    for number in draws.iter().flat_map(|d| d.numbers.iter()) {
        if (0..=9).contains(number) {
            counts[*number as usize] += 1;
        }
        total += 1;
    }
    let expected = if total > 0 { total as f64 / 10.0 } else { 1.0 };
    counts
        .iter()
        .map(|&observed| {
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

/// 相同标签连续出现记为一个游程
pub fn count_runs<'a, I>(labels: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut runs = 0u64;
    let mut prev: Option<&str> = None;
    for label in labels {
        if prev != Some(label) {
            runs += 1;
        }
        prev = Some(label);
    }
    runs
}

pub fn build_randomness_metrics(draws: &[DrawDto]) -> RandomnessMetrics {
    if draws.is_empty() {
        return RandomnessMetrics {
            chi_square: 0.0,
            runs: 0,
            mean_sum: 0.0,
            std_sum: 0.0,
        };
    }

    let runs = count_runs(draws.iter().rev().map(|d| d.odd_even.as_str()));

    let sums: Vec<f64> = draws.iter().map(|d| d.sum as f64).collect();
    let mean_sum = sums.iter().sum::<f64>() / sums.len() as f64;
    let std_sum = if sums.len() > 1 {
        let variance =
            sums.iter().map(|v| (v - mean_sum).powi(2)).sum::<f64>() / sums.len() as f64;
        variance.sqrt()
    } else {
        0.0
    };

    RandomnessMetrics {
        chi_square: chi_square_uniform(draws),
        runs,
        mean_sum,
        std_sum,
    }
}

/// 一阶转移矩阵，每个前驱状态的一行归一化为概率
pub fn build_transition_matrix<'a, I>(sequence: I) -> TransitionMatrix
where
    I: IntoIterator<Item = &'a str>,
{
    let mut transitions: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    let mut prev: Option<&str> = None;
    for state in sequence {
        if let Some(p) = prev {
            *transitions
                .entry(p.to_string())
                .or_default()
                .entry(state.to_string())
                .or_insert(0) += 1;
        }
        prev = Some(state);
    }

    transitions
        .into_iter()
        .map(|(state, counter)| {
            let total = counter.values().sum::<u64>().max(1) as f64;
            let row = counter
                .into_iter()
                .map(|(target, count)| (target, count as f64 / total))
                .collect();
            (state, row)
        })
        .collect()
}

pub fn build_markov_transitions(draws: &[DrawDto]) -> MarkovTransitions {
    if draws.len() < 2 {
        return MarkovTransitions::default();
    }
    MarkovTransitions {
        parity: build_transition_matrix(draws.iter().rev().map(|d| d.odd_even.as_str())),
        size: build_transition_matrix(draws.iter().rev().map(|d| d.big_small.as_str())),
    }
}

/// 最近 window 期的快照，旧 -> 新，供前端展示
pub fn build_sequence_snapshot(draws: &[DrawDto], window: usize) -> Vec<SnapshotEntry> {
    if window == 0 {
        return Vec::new();
    }
    // window 来自任务 payload，容量只能按实际期数给
    let mut queue: VecDeque<SnapshotEntry> = VecDeque::with_capacity(window.min(draws.len()));
    for draw in draws.iter().rev() {
        if queue.len() == window {
            queue.pop_front();
        }
        queue.push_back(SnapshotEntry {
            period: draw.period.clone(),
            sum: draw.sum,
            odd_even: draw.odd_even.clone(),
            big_small: draw.big_small.clone(),
            numbers: draw.numbers.clone(),
        });
    }
    queue.into_iter().collect()
}

pub fn build_statistical_report(draws: &[DrawDto], window: usize) -> StatisticalReport {
    StatisticalReport {
        period: draws.first().map(|d| d.period.clone()).unwrap_or_default(),
        window: draws.len(),
        frequency: build_digit_frequency(draws),
        randomness: build_randomness_metrics(draws),
        markov: build_markov_transitions(draws),
        sequence: build_sequence_snapshot(draws, window),
    }
}
