use std::sync::Arc;
use strata_core::config::JobConfig;
use strata_core::error::StrataError;
use strata_graph::model_update::MdUpdtCompTaskNode;
use strata_graph::register::RegstRef;
use strata_graph::task::{CompTaskNode, PlainCompTaskNode, TaskGraph, TaskId, TaskType};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn predict_graph() -> Result<(TaskGraph, TaskId), StrataError> {
    let mut graph = TaskGraph::new();
    let md_updt = graph.add_node(TaskType::ModelUpdate, Arc::new(MdUpdtCompTaskNode::new(1)));
    let fw = graph.add_node(TaskType::Forward, Arc::new(PlainCompTaskNode::new()));
    graph.add_edge(md_updt, fw)?;
    let pending = graph.build(&JobConfig::predict())?;
    assert_eq!(pending, [md_updt]);
    Ok((graph, md_updt))
}

fn regst(producer: TaskId, name: &str) -> RegstRef {
    RegstRef { producer, name: name.into() }
}

#[test]
fn ready_only_when_model_and_model_tmp_locked() -> Result<(), StrataError> {
    init();
    for order in [["model", "model_tmp"], ["model_tmp", "model"]] {
        let (mut graph, md_updt) = predict_graph()?;
        let behaviour = MdUpdtCompTaskNode::new(1);
        assert!(!behaviour.is_ready_for_build(&graph, md_updt));

        graph.lock_regst(&regst(md_updt, order[0]))?;
        assert!(!behaviour.is_ready_for_build(&graph, md_updt));
        assert_eq!(graph.build_ready(&JobConfig::predict())?, [md_updt]);
        assert!(!graph.produced_regst(md_updt, "data_tmp")?.is_locked());

        graph.lock_regst(&regst(md_updt, order[1]))?;
        assert!(behaviour.is_ready_for_build(&graph, md_updt));
        assert!(graph.build_ready(&JobConfig::predict())?.is_empty());
        assert!(graph.node(md_updt)?.is_built());
        assert!(graph.produced_regst(md_updt, "data_tmp")?.is_locked());
    }
    Ok(())
}

#[test]
fn predict_builds_no_exec_graph() -> Result<(), StrataError> {
    let (mut graph, md_updt) = predict_graph()?;
    graph.lock_regst(&regst(md_updt, "model"))?;
    graph.lock_regst(&regst(md_updt, "model_tmp"))?;
    graph.build_ready(&JobConfig::predict())?;
    let node = graph.node(md_updt)?;
    assert!(node.exec_gph().is_empty());
    assert!(node.consumed_regsts().is_empty());
    // Built nodes are not built again
    assert!(graph.build_ready(&JobConfig::predict())?.is_empty());
    Ok(())
}

#[test]
fn locked_registers_stay_locked() -> Result<(), StrataError> {
    let (mut graph, md_updt) = predict_graph()?;
    let model = regst(md_updt, "model");
    graph.regst_mut(&model)?.add_lbn("fc/weight")?;
    graph.lock_regst(&model)?;
    assert!(matches!(graph.lock_regst(&model), Err(StrataError::RegisterLocked(_))));
    assert!(matches!(graph.regst_mut(&model)?.add_lbn("fc/bias"), Err(StrataError::RegisterLocked(_))));
    assert!(graph.regst(&model)?.blob_desc("fc/weight")?.is_none());
    assert!(matches!(graph.regst(&model)?.blob_desc("fc/bias"), Err(StrataError::NotFound(_))));
    Ok(())
}
