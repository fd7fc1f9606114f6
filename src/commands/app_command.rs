use crate::jobs::model::JobType;
use crate::jobs::pool::RunMode;
use std::str::FromStr;

pub const USAGE: &str = "用法: lottery-pipeline <command>
  worker [once|daemon]
  scheduler [<iterations>|forever] [fail <task>]...
  validate
  collect
  enqueue <job_type> <payload-json> [priority]
  requeue <job_id>
  jobs [status] [page]
  results [analysis_type] [page]
  features [period] [page]
  stats
  help";

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Worker {
        mode: RunMode,
    },
    Scheduler {
        iterations: Option<u64>,
        simulate_failure: Vec<String>,
    },
    Validate,
    Collect,
    Enqueue {
        job_type: JobType,
        payload: String,
        priority: i32,
    },
    Requeue {
        job_id: i32,
    },
    Jobs {
        status: Option<String>,
        page: u64,
    },
    Results {
        analysis_type: Option<String>,
        page: u64,
    },
    Features {
        period: Option<String>,
        page: u64,
    },
    Stats,
    Help,
    Unknown(String),
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Help);
        }

        match parts[0] {
            "worker" => match parts.get(1).copied() {
                None | Some("once") => Ok(AppCommand::Worker {
                    mode: RunMode::Once,
                }),
                Some("daemon") => Ok(AppCommand::Worker {
                    mode: RunMode::Daemon,
                }),
                Some(_) => Ok(AppCommand::Unknown("用法: worker [once|daemon]".to_string())),
            },
            "scheduler" => parse_scheduler(&parts[1..]),
            "validate" => Ok(AppCommand::Validate),
            "collect" => Ok(AppCommand::Collect),
            "enqueue" => {
                let usage = "用法: enqueue <job_type> <payload-json> [priority]";
                let Some(job_type) = parts.get(1).and_then(|t| t.parse::<JobType>().ok()) else {
                    return Ok(AppCommand::Unknown(usage.to_string()));
                };
                // payload 里可能有空格，最后一个 token 是整数时当作 priority
                let mut rest = parts[2..].to_vec();
                let priority = match rest.last().and_then(|t| t.parse::<i32>().ok()) {
                    Some(p) if rest.len() > 1 => {
                        rest.pop();
                        p
                    }
                    _ => 5,
                };
                let payload = rest.join(" ");
                if payload.is_empty() {
                    return Ok(AppCommand::Unknown(usage.to_string()));
                }
                Ok(AppCommand::Enqueue {
                    job_type,
                    payload,
                    priority,
                })
            }
            "requeue" => match parts.get(1).and_then(|s| s.parse::<i32>().ok()) {
                Some(job_id) => Ok(AppCommand::Requeue { job_id }),
                None => Ok(AppCommand::Unknown("用法: requeue <job_id>".to_string())),
            },
            "jobs" => {
                let (status, page) = filter_and_page(&parts[1..], true);
                Ok(AppCommand::Jobs { status, page })
            }
            "results" => {
                let (analysis_type, page) = filter_and_page(&parts[1..], true);
                Ok(AppCommand::Results {
                    analysis_type,
                    page,
                })
            }
            "features" => {
                // 期号本身就是数字，单个参数总是期号
                let (period, page) = filter_and_page(&parts[1..], false);
                Ok(AppCommand::Features { period, page })
            }
            "stats" => Ok(AppCommand::Stats),
            "help" | "h" => Ok(AppCommand::Help),
            _ => Ok(AppCommand::Unknown(format!("未知命令: {}", parts[0]))),
        }
    }
}

fn parse_scheduler(args: &[&str]) -> Result<AppCommand, ()> {
    let usage = "用法: scheduler [<iterations>|forever] [fail <task>]...";
    let mut iterations = Some(1);
    let mut simulate_failure = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "forever" => iterations = None,
            "fail" => match args.get(i + 1) {
                Some(task) => {
                    simulate_failure.push(task.to_string());
                    i += 1;
                }
                None => return Ok(AppCommand::Unknown(usage.to_string())),
            },
            n => match n.parse::<u64>() {
                Ok(v) if v > 0 => iterations = Some(v),
                _ => return Ok(AppCommand::Unknown(usage.to_string())),
            },
        }
        i += 1;
    }
    Ok(AppCommand::Scheduler {
        iterations,
        simulate_failure,
    })
}

/// `[filter] [page]`；numeric_is_page 时单个纯数字参数按页码处理
fn filter_and_page(args: &[&str], numeric_is_page: bool) -> (Option<String>, u64) {
    match args {
        [] => (None, 0),
        [one] => match one.parse::<u64>() {
            Ok(page) if numeric_is_page => (None, page),
            _ => (Some(one.to_string()), 0),
        },
        [filter, page, ..] => (Some(filter.to_string()), page.parse().unwrap_or(0)),
    }
}
