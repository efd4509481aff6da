//! resize 时的重建顺序
//!
//! 每个 pass 声明自己产出和读取的 [`TargetId`]，据此构建 DAG 并进行拓扑排序：
//! 读取其他 pass 产出的 target 的 pass，一定在产出者之后重建。

use std::collections::{HashMap, VecDeque};

use itertools::Itertools;

use crate::scene_targets::TargetId;

/// 依赖图，边从 producer 指向 consumer
pub struct RebuildGraph {
    pass_count: usize,
    /// 邻接表（出边）
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
}

impl RebuildGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            pass_count,
            adjacency: vec![Vec::new(); pass_count],
            in_degrees: vec![0; pass_count],
        }
    }

    pub fn add_edge(&mut self, producer: usize, consumer: usize) {
        // 避免重复边
        if producer != consumer && !self.adjacency[producer].contains(&consumer) {
            self.adjacency[producer].push(consumer);
            self.in_degrees[consumer] += 1;
        }
    }

    /// 从每个 pass 的 (inputs, outputs) 构建依赖图
    pub fn analyze(io: &[(&[TargetId], &[TargetId])]) -> Self {
        let mut graph = Self::new(io.len());
        let producers: HashMap<TargetId, usize> = io
            .iter()
            .enumerate()
            .flat_map(|(pass_idx, (_, outputs))| outputs.iter().map(move |target| (*target, pass_idx)))
            .collect();

        for (consumer, (inputs, _)) in io.iter().enumerate() {
            for target in inputs.iter() {
                if let Some(&producer) = producers.get(target) {
                    graph.add_edge(producer, consumer);
                }
            }
        }
        graph
    }

    /// 拓扑排序；同时就绪的 pass 按照原本的顺序排列
    ///
    /// - `Ok(order)`: 排序后的 pass 索引
    /// - `Err(cycle)`: 存在循环依赖，返回参与循环的 pass
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut queue: VecDeque<usize> = (0..self.pass_count).filter(|&i| in_degrees[i] == 0).collect();
        let mut result = Vec::with_capacity(self.pass_count);

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in self.adjacency[node].iter().sorted() {
                in_degrees[neighbor] -= 1;
                if in_degrees[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() != self.pass_count {
            Err((0..self.pass_count).filter(|&i| in_degrees[i] > 0).collect())
        } else {
            Ok(result)
        }
    }

    /// 需要重建的 pass（按重建顺序）：自身依赖尺寸，或者任意一个前驱需要重建
    pub fn rebuild_order(&self, size_dependent: &[bool]) -> Result<Vec<usize>, Vec<usize>> {
        debug_assert_eq!(size_dependent.len(), self.pass_count);
        let order = self.topological_sort()?;
        let mut dirty = size_dependent.to_vec();
        for &node in &order {
            if dirty[node] {
                for &succ in &self.adjacency[node] {
                    dirty[succ] = true;
                }
            }
        }
        Ok(order.into_iter().filter(|&node| dirty[node]).collect())
    }

    pub fn successors(&self, pass_index: usize) -> &[usize] {
        &self.adjacency[pass_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io<'a>(inputs: &'a [TargetId], outputs: &'a [TargetId]) -> (&'a [TargetId], &'a [TargetId]) {
        (inputs, outputs)
    }

    #[test]
    fn test_consumer_after_producer() {
        // 0: composite 读 color 写 composite；1: geometry 写 color；2: late 读 composite
        let passes = vec![
            io(&[TargetId::SceneColor], &[TargetId::Composite]),
            io(&[], &[TargetId::SceneColor]),
            io(&[TargetId::Composite], &[]),
        ];
        let graph = RebuildGraph::analyze(&passes);
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0, 2]);
    }

    #[test]
    fn test_rebuild_propagates_to_consumers() {
        let passes = vec![
            io(&[], &[TargetId::ShadowMap]),
            io(&[], &[TargetId::Depth]),
            io(&[TargetId::Depth, TargetId::ShadowMap], &[TargetId::SceneColor]),
            io(&[TargetId::ShadowMap], &[]),
        ];
        let graph = RebuildGraph::analyze(&passes);
        // 只有 depth 的产出者依赖尺寸
        let order = graph.rebuild_order(&[false, true, false, false]).unwrap();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = RebuildGraph::new(2);
        graph.add_edge(0, 1);
        graph.add_edge(1, 0);
        assert_eq!(graph.topological_sort(), Err(vec![0, 1]));
    }
}
